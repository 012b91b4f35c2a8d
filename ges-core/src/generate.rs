//! Random identifiers and placements for new machines.

use chrono::Datelike;
use rand::Rng;
use serde::{Deserialize, Serialize};

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A random string of uppercase letters and digits.
pub fn string<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char)
        .collect()
}

/// A serial number of the form `<model><revision><week><year><unit>`, where
/// week and year come from today's ISO calendar and `unit` is a random
/// six-digit number.
pub fn serial_number<R: Rng + ?Sized>(rng: &mut R, model: &str, revision: &str) -> String {
    let today = chrono::Local::now().iso_week();
    let unit: u32 = rng.gen_range(0..=999_999);
    format!("{model}{revision}{}{}{unit:06}", today.week(), today.year())
}

/// A GPS coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// A random location within the contiguous United States.
pub fn location<R: Rng + ?Sized>(rng: &mut R) -> Location {
    Location {
        lat: rng.gen_range(24.52..49.38),
        lon: rng.gen_range(-124.77..-66.95),
    }
}
