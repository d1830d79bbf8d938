pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod services;
