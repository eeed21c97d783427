pub mod handeye;
pub mod pivot;
pub mod pointer_based;
pub mod ultrasound_pin;

pub use handeye::*;
pub use pivot::*;
pub use pointer_based::*;
pub use ultrasound_pin::*;
