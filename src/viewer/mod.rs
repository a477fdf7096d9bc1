pub mod feed_state;
pub mod live_view;
pub mod tail;
