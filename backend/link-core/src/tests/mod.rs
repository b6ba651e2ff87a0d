mod auth;
mod trust;
