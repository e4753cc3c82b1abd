//! Inventory domain module (event-sourced).
//!
//! The reconciliation core of the system: per-product stock buckets across
//! locations, atomic transfers, reservation/commit for concurrent sales,
//! stock takes, and the serial-number lifecycle. All of it is deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod item;
pub mod location;
pub mod serial;
pub mod take;

pub use item::{
    AdjustStock, AdjustmentReason, CommitReservation, LocationStock, ProductTracked, ReceiveStock,
    ReleaseReservation, ReorderPointSet, ReservationCommitted, ReservationReleased, Reservation,
    ReserveStock, SetReorderPoint, StockAdjusted, StockCommand, StockEvent, StockItem, StockItemId,
    StockReceived, StockReserved, StockTransferred, TrackProduct, TransferStock,
};
pub use location::{
    CloseLocation, CreateLocation, Location, LocationCommand, LocationEvent, LocationId,
    LocationKind, RenameLocation,
};
pub use serial::{
    AcceptReturn, MarkSold, PutInStock, RegisterSerial, ReserveSerial, RestockSerial, ScrapSerial,
    SerialCommand, SerialEvent, SerialState, SerialUnit, SerialUnitId,
};
pub use take::{
    CancelStockTake, CountLine, OpenStockTake, PostStockTake, RecordCount, StockTake,
    StockTakeCommand, StockTakeEvent, StockTakeId, StockTakeStatus, VarianceLine,
};
