pub mod backup;
pub mod csv;
pub mod lookup;
pub mod sheets;
