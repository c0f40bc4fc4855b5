mod compress_name;
mod migrate;

pub use compress_name::CompressNameCommand;
pub use migrate::MigrateCommand;
