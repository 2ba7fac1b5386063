//! Calibration compensation collaborator.
//!
//! The calibration subsystem owns its file format; the link only needs a
//! frequency → dB lookup. The lookup is applied when formatting power values
//! for display or for the set-power command, never inside the transport,
//! poller or motion code.

/// Frequency-dependent path loss lookup.
pub trait Compensation: Send + Sync {
    /// Compensation in dB to apply at `freq_ghz`.
    fn compensation_db(&self, freq_ghz: f64) -> f64;
}

/// No calibration loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompensation;

impl Compensation for NoCompensation {
    fn compensation_db(&self, _freq_ghz: f64) -> f64 {
        0.0
    }
}

/// Piecewise-linear table of `(freq_ghz, db)` points.
///
/// Outside the table the nearest end point is used.
#[derive(Debug, Clone, Default)]
pub struct TableCompensation {
    points: Vec<(f64, f64)>,
}

impl TableCompensation {
    /// Build from unordered points; non-finite points are dropped.
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.retain(|(f, db)| f.is_finite() && db.is_finite());
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { points }
    }

    /// Same offset at every frequency.
    pub fn flat(db: f64) -> Self {
        Self::new(vec![(0.0, db)])
    }
}

impl Compensation for TableCompensation {
    fn compensation_db(&self, freq_ghz: f64) -> f64 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };
        if freq_ghz <= first.0 {
            return first.1;
        }
        if freq_ghz >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (f0, d0) = pair[0];
            let (f1, d1) = pair[1];
            if freq_ghz <= f1 {
                if f1 == f0 {
                    return d1;
                }
                return d0 + (d1 - d0) * (freq_ghz - f0) / (f1 - f0);
            }
        }
        last.1
    }
}

/// Power to command at the source so `target_dbm` arrives at the device under test.
pub fn commanded_power_dbm(target_dbm: f64, freq_ghz: f64, comp: &dyn Compensation) -> f64 {
    target_dbm + comp.compensation_db(freq_ghz)
}

/// Power seen at the device under test when the source reports `source_dbm`.
pub fn displayed_power_dbm(source_dbm: f64, freq_ghz: f64, comp: &dyn Compensation) -> f64 {
    source_dbm - comp.compensation_db(freq_ghz)
}

/// Parse an instrument frequency reply into GHz.
///
/// Accepts plain Hz (`10000000000`, `1.0E10`) or a unit suffix
/// (`10GHz`, `500 MHz`, `2.4e9Hz`), case-insensitive.
pub fn parse_frequency_ghz(text: &str) -> Option<f64> {
    let lower = text.trim().to_ascii_lowercase();
    let (number, divisor) = if let Some(n) = lower.strip_suffix("ghz") {
        (n, 1.0)
    } else if let Some(n) = lower.strip_suffix("mhz") {
        (n, 1e3)
    } else if let Some(n) = lower.strip_suffix("khz") {
        (n, 1e6)
    } else if let Some(n) = lower.strip_suffix("hz") {
        (n, 1e9)
    } else {
        (lower.as_str(), 1e9)
    };
    let value = number.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value / divisor)
}

/// Parse an instrument power reply (`-10.5`, `-10.5dBm`) into dBm.
pub fn parse_power_dbm(text: &str) -> Option<f64> {
    let lower = text.trim().to_ascii_lowercase();
    let number = lower.strip_suffix("dbm").unwrap_or(lower.as_str());
    number.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Format a power value for display.
pub fn format_power(dbm: f64) -> String {
    format!("{dbm:.2} dBm")
}
