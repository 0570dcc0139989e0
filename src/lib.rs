//! Image annotation survey: participants mark up served images on a drawing
//! canvas and submit the flattened result; an admin manages the image set.

pub mod admin;
pub mod annotation;
pub mod backend;
pub mod canvas;
pub mod config;
pub mod flatten;
pub mod history;
pub mod identity;
pub mod surface;
pub mod survey;
