// src/core/windows.rs
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Window, WindowKind};
use crate::utils::tz::local_midnight;

/// Splits `[since, until)` into calendar-aligned windows in `tz`.
///
/// Each requested kind is an independent partition of the same range.
/// Output is sorted by `(kind, start)`; windows touching the range edges are
/// clipped to it. An empty or inverted range yields no windows.
pub fn partition(
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    tz: Tz,
    kinds: &BTreeSet<WindowKind>,
) -> Vec<Window> {
    if since >= until {
        return Vec::new();
    }

    let since_local = since.with_timezone(&tz);
    let until_local = until.with_timezone(&tz);
    let last_date = until_local.date_naive();

    let mut windows = Vec::new();
    for &kind in kinds {
        let mut unit = match unit_floor(kind, since_local.date_naive()) {
            Some(d) => d,
            None => continue,
        };
        while unit <= last_date {
            let Some(next) = unit_next(kind, unit) else {
                break;
            };
            let start = local_midnight(unit, &tz).max(since_local);
            let end = local_midnight(next, &tz).min(until_local);
            // Skipped local days (e.g. Pacific/Apia 2011-12-30) collapse to nothing.
            if start < end {
                windows.push(Window { start, end, kind });
            }
            unit = next;
        }
    }
    windows
}

/// First date of the calendar unit containing `date`.
fn unit_floor(kind: WindowKind, date: NaiveDate) -> Option<NaiveDate> {
    match kind {
        WindowKind::Day => Some(date),
        WindowKind::Week => date.checked_sub_days(Days::new(
            u64::from(date.weekday().num_days_from_monday()),
        )),
        WindowKind::Month => date.with_day(1),
        WindowKind::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
    }
}

/// First date of the unit following the one starting at `start`.
fn unit_next(kind: WindowKind, start: NaiveDate) -> Option<NaiveDate> {
    match kind {
        WindowKind::Day => start.checked_add_days(Days::new(1)),
        WindowKind::Week => start.checked_add_days(Days::new(7)),
        WindowKind::Month => {
            let (year, month) = if start.month() == 12 {
                (start.year() + 1, 1)
            } else {
                (start.year(), start.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
        }
        WindowKind::Year => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1),
    }
}

/// Per-kind ordered windows with lookup by local instant.
#[derive(Debug, Clone, Default)]
pub struct WindowGrid {
    by_kind: BTreeMap<WindowKind, Vec<Window>>,
}

impl WindowGrid {
    pub fn new(windows: Vec<Window>) -> Self {
        let mut by_kind: BTreeMap<WindowKind, Vec<Window>> = BTreeMap::new();
        for window in windows {
            by_kind.entry(window.kind).or_default().push(window);
        }
        for list in by_kind.values_mut() {
            list.sort_by(|a, b| a.start.cmp(&b.start));
        }
        Self { by_kind }
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn windows(&self) -> impl Iterator<Item = &Window> {
        self.by_kind.values().flatten()
    }

    /// The window of every kind that contains `instant`, at most one per kind.
    pub fn containing<'a>(&'a self, instant: &DateTime<Tz>) -> impl Iterator<Item = &'a Window> + 'a {
        let instant = instant.clone();
        self.by_kind.values().filter_map(move |list| {
            let idx = list.partition_point(|w| w.end <= instant);
            list.get(idx).filter(|w| w.contains(&instant))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn local(tz: Tz, y: i32, m: u32, d: u32) -> DateTime<Utc> {
        tz.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn kinds(list: &[WindowKind]) -> BTreeSet<WindowKind> {
        list.iter().copied().collect()
    }

    fn bounds(windows: &[Window]) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        windows
            .iter()
            .map(|w| (w.start.with_timezone(&Utc), w.end.with_timezone(&Utc)))
            .collect()
    }

    fn assert_exact_cover(windows: &[Window], since: DateTime<Utc>, until: DateTime<Utc>) {
        assert!(!windows.is_empty());
        assert_eq!(windows[0].start.with_timezone(&Utc), since);
        assert_eq!(windows[windows.len() - 1].end.with_timezone(&Utc), until);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap");
        }
        assert!(windows.iter().all(|w| w.start < w.end));
    }

    #[test]
    fn months_handle_leap_february() {
        let windows = partition(
            utc(2024, 1, 29),
            utc(2024, 3, 2),
            Tz::UTC,
            &kinds(&[WindowKind::Month]),
        );
        assert_eq!(
            bounds(&windows),
            vec![
                (utc(2024, 1, 29), utc(2024, 2, 1)),
                (utc(2024, 2, 1), utc(2024, 3, 1)),
                (utc(2024, 3, 1), utc(2024, 3, 2)),
            ]
        );
        assert_eq!(windows[1].end - windows[1].start, Duration::days(29));
    }

    #[test]
    fn months_roll_december_into_january() {
        let windows = partition(
            utc(2023, 12, 20),
            utc(2024, 1, 5),
            Tz::UTC,
            &kinds(&[WindowKind::Month]),
        );
        assert_eq!(
            bounds(&windows),
            vec![
                (utc(2023, 12, 20), utc(2024, 1, 1)),
                (utc(2024, 1, 1), utc(2024, 1, 5)),
            ]
        );
    }

    #[test]
    fn weeks_are_monday_aligned() {
        // 2024-01-03 is a Wednesday.
        let windows = partition(
            utc(2024, 1, 3),
            utc(2024, 1, 20),
            Tz::UTC,
            &kinds(&[WindowKind::Week]),
        );
        assert_eq!(
            bounds(&windows),
            vec![
                (utc(2024, 1, 3), utc(2024, 1, 8)),
                (utc(2024, 1, 8), utc(2024, 1, 15)),
                (utc(2024, 1, 15), utc(2024, 1, 20)),
            ]
        );
    }

    #[test]
    fn years_split_on_january_first() {
        let windows = partition(
            utc(2023, 12, 15),
            utc(2024, 1, 10),
            Tz::UTC,
            &kinds(&[WindowKind::Year]),
        );
        assert_eq!(
            bounds(&windows),
            vec![
                (utc(2023, 12, 15), utc(2024, 1, 1)),
                (utc(2024, 1, 1), utc(2024, 1, 10)),
            ]
        );
    }

    #[test]
    fn days_follow_local_midnight_across_dst() {
        let tz = chrono_tz::Europe::Berlin;
        let since = local(tz, 2024, 3, 29);
        let until = local(tz, 2024, 4, 2);
        let windows = partition(since, until, tz, &kinds(&[WindowKind::Day]));

        assert_eq!(windows.len(), 4);
        assert_exact_cover(&windows, since, until);
        // 2024-03-31 is the spring-forward day.
        assert_eq!(windows[2].end - windows[2].start, Duration::hours(23));
        assert_eq!(windows[1].end - windows[1].start, Duration::hours(24));
    }

    #[test]
    fn every_kind_covers_range_without_gaps() {
        let tz = chrono_tz::Europe::Moscow;
        let since = Utc.with_ymd_and_hms(2023, 11, 17, 13, 45, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2025, 2, 3, 8, 0, 0).unwrap();
        let all = partition(since, until, tz, &kinds(&WindowKind::ALL));

        for kind in WindowKind::ALL {
            let of_kind: Vec<Window> = all.iter().filter(|w| w.kind == kind).cloned().collect();
            assert_exact_cover(&of_kind, since, until);
        }
    }

    #[test]
    fn every_kind_covers_range_where_midnight_is_skipped() {
        // Both zones spring forward at 00:00, so some local midnights do not exist.
        for tz in [chrono_tz::America::Santiago, chrono_tz::America::Asuncion] {
            let since = Utc.with_ymd_and_hms(2022, 8, 20, 15, 0, 0).unwrap();
            let until = Utc.with_ymd_and_hms(2024, 10, 12, 3, 0, 0).unwrap();
            let all = partition(since, until, tz, &kinds(&WindowKind::ALL));

            for kind in WindowKind::ALL {
                let of_kind: Vec<Window> = all.iter().filter(|w| w.kind == kind).cloned().collect();
                assert_exact_cover(&of_kind, since, until);
            }
        }
    }

    #[test]
    fn month_starting_in_dst_gap_opens_at_first_valid_instant() {
        use chrono::Timelike;

        // Paraguay skipped 2023-10-01 00:00..01:00.
        let tz = chrono_tz::America::Asuncion;
        let windows = partition(
            local(tz, 2023, 9, 10),
            local(tz, 2023, 11, 10),
            tz,
            &kinds(&[WindowKind::Month]),
        );

        assert_eq!(windows.len(), 3);
        let october = &windows[1];
        assert_eq!(october.start.date_naive(), NaiveDate::from_ymd_opt(2023, 10, 1).unwrap());
        assert_eq!(october.start.hour(), 1);
        assert_eq!(windows[0].end, october.start);
    }

    #[test]
    fn output_is_sorted_by_kind_then_start() {
        let windows = partition(
            utc(2024, 2, 27),
            utc(2024, 3, 3),
            Tz::UTC,
            &kinds(&[WindowKind::Year, WindowKind::Day, WindowKind::Month]),
        );
        let order: Vec<WindowKind> = windows.iter().map(|w| w.kind).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
        assert_eq!(windows.iter().filter(|w| w.kind == WindowKind::Day).count(), 5);
        assert_eq!(windows.iter().filter(|w| w.kind == WindowKind::Month).count(), 2);
        assert_eq!(windows.iter().filter(|w| w.kind == WindowKind::Year).count(), 1);
    }

    #[test]
    fn inverted_or_empty_range_yields_nothing() {
        let all = kinds(&WindowKind::ALL);
        assert!(partition(utc(2024, 1, 2), utc(2024, 1, 1), Tz::UTC, &all).is_empty());
        assert!(partition(utc(2024, 1, 1), utc(2024, 1, 1), Tz::UTC, &all).is_empty());
    }

    #[test]
    fn grid_finds_one_window_per_kind() {
        let windows = partition(
            utc(2024, 1, 1),
            utc(2024, 3, 1),
            Tz::UTC,
            &kinds(&WindowKind::ALL),
        );
        let grid = WindowGrid::new(windows);
        let instant = Tz::UTC.with_ymd_and_hms(2024, 2, 14, 12, 0, 0).unwrap();

        let hits: Vec<&Window> = grid.containing(&instant).collect();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|w| w.contains(&instant)));

        let outside = Tz::UTC.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(grid.containing(&outside).count(), 0);
    }
}
