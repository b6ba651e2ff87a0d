mod connect;
mod helpers;
mod tls;
