pub mod projection_parser;
pub mod setup_parser;
pub mod wire;

pub use projection_parser::{ProjectionCell, ProjectionPlace, ProjectionSetup};
pub use setup_parser::{CalibrationCell, CalibrationPlace, CalibrationSetup, ParamRange, ParamRanges};
pub use wire::{CalibTask, CalibTaskData, CalibTaskResult, ProjTask, ProjTaskData, ProjTaskResult};
