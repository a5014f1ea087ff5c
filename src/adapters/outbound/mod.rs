mod static_fleet;

pub use static_fleet::StaticFleetSource;
