pub mod app_user;
pub mod collection;
pub mod team;
