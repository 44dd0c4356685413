pub mod gbfs;
pub mod open_meteo;
pub mod poller;
