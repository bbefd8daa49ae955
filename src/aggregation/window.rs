use chrono::{Duration, NaiveDateTime};

/// Closed time range `[start, end]` used to select samples for one marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// True when the start was seeded from the look-back instead of the
    /// previous marker.
    pub new_day: bool,
}

impl WindowBounds {
    /// Windows are contiguous within a calendar day: the previous marker
    /// becomes the start. The first marker of a day looks back a fixed
    /// amount instead.
    pub fn for_marker(
        marker: NaiveDateTime,
        previous: Option<NaiveDateTime>,
        lookback: Duration,
    ) -> Self {
        match previous {
            Some(prev) if prev.date() == marker.date() => Self {
                start: prev,
                end: marker,
                new_day: false,
            },
            _ => Self {
                start: marker - lookback,
                end: marker,
                new_day: true,
            },
        }
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Boundaries for an ascending sequence of markers.
pub fn plan_windows(markers: &[NaiveDateTime], lookback: Duration) -> Vec<WindowBounds> {
    let mut previous = None;
    markers
        .iter()
        .map(|&marker| {
            let bounds = WindowBounds::for_marker(marker, previous, lookback);
            previous = Some(marker);
            bounds
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn ten_minutes() -> Duration {
        Duration::minutes(10)
    }

    #[test]
    fn first_marker_looks_back() {
        let bounds = WindowBounds::for_marker(ts(1, 8, 10, 0), None, ten_minutes());
        assert_eq!(bounds.start, ts(1, 8, 0, 0));
        assert_eq!(bounds.end, ts(1, 8, 10, 0));
        assert!(bounds.new_day);
    }

    #[test]
    fn same_day_windows_are_contiguous() {
        let markers = [ts(1, 8, 10, 0), ts(1, 8, 25, 0), ts(1, 13, 0, 0)];
        let windows = plan_windows(&markers, ten_minutes());

        assert_eq!(windows[1].start, markers[0]);
        assert_eq!(windows[2].start, markers[1]);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(!windows[1].new_day && !windows[2].new_day);
    }

    #[test]
    fn day_change_resets_to_lookback() {
        let markers = [ts(1, 23, 50, 0), ts(2, 0, 5, 0)];
        let windows = plan_windows(&markers, ten_minutes());

        // 00:05 minus ten minutes lands on the previous evening, not on 23:50.
        assert_eq!(windows[1].start, ts(1, 23, 55, 0));
        assert!(windows[1].new_day);
    }

    #[test]
    fn lookback_is_configurable() {
        let bounds = WindowBounds::for_marker(ts(1, 8, 10, 0), None, Duration::minutes(3));
        assert_eq!(bounds.start, ts(1, 8, 7, 0));
    }

    #[test]
    fn contains_is_inclusive_on_both_ends() {
        let bounds = WindowBounds::for_marker(ts(1, 8, 10, 0), None, ten_minutes());
        assert!(bounds.contains(ts(1, 8, 0, 0)));
        assert!(bounds.contains(ts(1, 8, 10, 0)));
        assert!(bounds.contains(ts(1, 8, 0, 5)));
        assert!(!bounds.contains(ts(1, 7, 59, 59)));
        assert!(!bounds.contains(ts(1, 8, 10, 1)));
    }

    #[test]
    fn empty_input_plans_nothing() {
        assert!(plan_windows(&[], ten_minutes()).is_empty());
    }
}
