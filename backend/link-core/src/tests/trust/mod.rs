mod identity;
mod store;
mod tofu;
