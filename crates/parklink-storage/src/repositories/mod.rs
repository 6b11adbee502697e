pub mod station_record;

pub use station_record::{SqliteStationRecordRepository, StationRecordRepository};
