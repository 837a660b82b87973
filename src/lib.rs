//! newsroll keeps a local store of RSS and Atom subscriptions up to date.
//!
//! [`refresh::Refresher`] drives one refresh per feed: fetch the document,
//! parse it, reconcile its articles against stored items, resolve an icon and
//! commit everything in one transaction. [`group::group_items`] buckets a
//! feed's items by date for display.

pub mod cache;
pub mod clock;
pub mod config;
pub mod feed;
pub mod group;
pub mod icon;
pub mod net;
pub mod reconcile;
pub mod refresh;
pub mod storage;
pub mod util;
