//! Size bound of an encoded record line.
//!
//! A record is `<id>;<timestamp>` followed by one `;`-prefixed field per
//! active sensor, each holding `accumulation` samples joined by `|`. The
//! bound below is what every line written to `pending` must respect, so
//! the accumulation a node may run with depends on which sensors it reports.

use crate::SensorKind;

/// Upper bound on an encoded line, newline excluded.
pub const MAX_LINE_LEN: usize = 512;

/// `u32::MAX` in decimal.
const MAX_U32_DIGITS: usize = 10;

/// Record id, `;`, timestamp.
const HEADER_LEN: usize = MAX_U32_DIGITS * 2 + 1;

/// Bytes one accumulation round adds: per sensor, one sample plus its `;`
/// or `|` delimiter.
fn round_len(sensors: &[SensorKind]) -> usize {
    sensors.iter().map(|k| k.max_sample_len() + 1).sum()
}

/// Longest line a record over `sensors` can encode to when every field
/// holds `accumulation` in-range samples.
pub fn worst_case_line_len(sensors: &[SensorKind], accumulation: u32) -> usize {
    let rounds = accumulation.max(1) as usize;
    HEADER_LEN.saturating_add(rounds.saturating_mul(round_len(sensors)))
}

/// Largest accumulation whose worst-case line fits [`MAX_LINE_LEN`].
pub fn max_accumulation_for(sensors: &[SensorKind]) -> u32 {
    let per_round = round_len(sensors);
    if per_round == 0 {
        return u32::MAX;
    }
    let rounds = (MAX_LINE_LEN - HEADER_LEN) / per_round;
    u32::try_from(rounds).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ParamLimits;

    #[test]
    fn test_single_sample_line() {
        let len = worst_case_line_len(&[SensorKind::Signal], 1);
        assert_eq!(len, "4294967295;4294967295;31".len());
    }

    #[test]
    fn test_rounds_add_sample_and_separator() {
        let sensors = [SensorKind::Temperature, SensorKind::Signal];
        let one = worst_case_line_len(&sensors, 1);
        let three = worst_case_line_len(&sensors, 3);
        assert_eq!(three - one, 2 * ("-40.00|".len() + "31|".len()));
    }

    #[test]
    fn test_max_accumulation_is_tight() {
        let limit = max_accumulation_for(&SensorKind::ALL);
        assert!(worst_case_line_len(&SensorKind::ALL, limit) <= MAX_LINE_LEN);
        assert!(worst_case_line_len(&SensorKind::ALL, limit + 1) > MAX_LINE_LEN);
    }

    #[test]
    fn test_default_limit_fits_every_sensor() {
        assert!(ParamLimits::default().max_accumulation <= max_accumulation_for(&SensorKind::ALL));
    }

    #[test]
    fn test_fewer_sensors_allow_more_rounds() {
        assert!(max_accumulation_for(&[SensorKind::Signal]) > max_accumulation_for(&SensorKind::ALL));
        assert_eq!(max_accumulation_for(&[]), u32::MAX);
    }
}
