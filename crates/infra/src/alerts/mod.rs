pub mod low_stock_runner;

pub use low_stock_runner::{
    AlertSink, InMemoryAlertSink, LowStockRunner, LowStockRunnerHandle,
};
