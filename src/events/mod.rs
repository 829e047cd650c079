//! # Events Module
//!
//! Push-style delivery on top of pull-style channels.

pub mod adapter;

pub use adapter::{ChannelEventAdapter, HandlerFailure, HandlerId, Observer, Subscription};
