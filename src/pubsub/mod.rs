pub mod bus;

pub use bus::NotifyBus;
