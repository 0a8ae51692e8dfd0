mod caching;
mod lifecycle;
mod registry_sync;
mod scenarios;
