//! # ttsync Upstream
//!
//! Client for the intranet timetable site the daemon refreshes from.
//!
//! ## Features
//!
//! - Form login with transparent re-login on session expiry
//! - Metadata scraped from the calendar page's bootstrap script
//! - Class and lesson queries against the site's AJAX endpoints
//! - Wall-clock timestamps converted from the site's timezone to UTC

pub mod client;
pub mod error;
pub mod types;

pub use client::{IntranetClient, UpstreamClient};
pub use error::UpstreamError;
pub use types::{Lesson, LessonStatus, Metadata, SchoolClass, Semester, TimeSlot, Week};
