mod helpers;
mod warehouse_session;
