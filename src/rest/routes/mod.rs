pub mod activity;
pub mod chat;
pub mod files;
pub mod health;
pub mod identity;
pub mod progress;
pub mod workspaces;
