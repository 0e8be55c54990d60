pub mod actions;
pub mod events;
pub mod named_user;
