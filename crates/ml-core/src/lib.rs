//! Detector boundary: the [`Detect`] trait, the [`Detection`] record and, with the
//! `with-tch` feature, a TorchScript YOLO implementation.

pub mod detector;
pub mod labels;
#[cfg(feature = "with-tch")]
mod runtime;
#[cfg(feature = "with-tch")]
pub mod torch;

pub use detector::{Detect, Detection, filter_target};
pub use labels::{COCO_CLASSES, class_name};

#[cfg(feature = "with-tch")]
pub use tch;
#[cfg(feature = "with-tch")]
pub use torch::TorchDetector;
