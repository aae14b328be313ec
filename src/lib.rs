pub mod draw;
pub mod logging;
pub mod replay;
