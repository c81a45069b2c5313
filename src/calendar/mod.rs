//! Month grid and year progress derived from the entry snapshot.
//!
//! Everything here is a pure function of its inputs; callers pass "now"
//! explicitly and the grid is rebuilt whenever the snapshot changes.

use std::collections::HashMap;
use std::fmt::Write as _;

use time::{Date, Duration, Month, OffsetDateTime};

use crate::model::Entry;

mod progress;

pub use progress::{year_progress, YearProgress, DAYS_PER_YEAR};

pub const GRID_CELLS: usize = 42;
pub const WEEKDAY_LABELS: [&str; 7] = ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"];

/// The month currently shown. Always points at a representable first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthCursor {
    first: Date,
}

impl MonthCursor {
    pub fn new(year: i32, month: Month) -> Option<Self> {
        Date::from_calendar_date(year, month, 1)
            .ok()
            .map(|first| Self { first })
    }

    pub fn containing(date: Date) -> Self {
        Self {
            first: date.replace_day(1).unwrap_or(date),
        }
    }

    pub fn year(self) -> i32 {
        self.first.year()
    }

    pub fn month(self) -> Month {
        self.first.month()
    }

    /// 0-based month index (January = 0).
    pub fn month0(self) -> u8 {
        u8::from(self.first.month()) - 1
    }

    pub fn first_day(self) -> Date {
        self.first
    }

    pub fn days_in_month(self) -> u8 {
        self.month().length(self.year())
    }

    /// Weekday of the 1st, 0 = Sunday.
    pub fn first_weekday(self) -> u8 {
        self.first.weekday().number_days_from_sunday()
    }

    /// Following month; stays put at the end of the representable range.
    pub fn next(self) -> Self {
        self.first
            .checked_add(Duration::days(i64::from(self.days_in_month())))
            .map(|first| Self { first })
            .unwrap_or(self)
    }

    pub fn previous(self) -> Self {
        self.first
            .previous_day()
            .map(Self::containing)
            .unwrap_or(self)
    }

    pub fn contains(self, date: Date) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Previous,
    Current,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarCell<'a> {
    pub date: Date,
    pub membership: Membership,
    pub is_today: bool,
    pub entry: Option<&'a Entry>,
}

impl CalendarCell<'_> {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> Month {
        self.date.month()
    }

    pub fn month0(&self) -> u8 {
        u8::from(self.date.month()) - 1
    }

    pub fn day(&self) -> u8 {
        self.date.day()
    }

    pub fn is_current(&self) -> bool {
        self.membership == Membership::Current
    }

    fn filler(date: Date, membership: Membership) -> Self {
        Self {
            date,
            membership,
            is_today: false,
            entry: None,
        }
    }
}

/// Lay out `cursor`'s month on a Sunday-first 6x7 grid.
///
/// Entry days are computed in `now`'s offset. When several entries fall on
/// the same day the one appearing last in `entries` occupies the cell.
pub fn build_month_grid(
    entries: &[Entry],
    cursor: MonthCursor,
    now: OffsetDateTime,
) -> Vec<CalendarCell<'_>> {
    let offset = now.offset();
    let today = now.date();

    let mut by_day: HashMap<u8, &Entry> = HashMap::new();
    for entry in entries {
        let date = entry.local_date(offset);
        if cursor.contains(date) {
            by_day.insert(date.day(), entry);
        }
    }

    let mut cells = Vec::with_capacity(GRID_CELLS);

    let mut leading = Vec::with_capacity(7);
    let mut date = cursor.first_day();
    for _ in 0..cursor.first_weekday() {
        match date.previous_day() {
            Some(prev) => {
                leading.push(prev);
                date = prev;
            }
            None => break,
        }
    }
    cells.extend(
        leading
            .into_iter()
            .rev()
            .map(|date| CalendarCell::filler(date, Membership::Previous)),
    );

    let mut last = cursor.first_day();
    for day in 1..=cursor.days_in_month() {
        let Ok(date) = cursor.first_day().replace_day(day) else {
            break;
        };
        cells.push(CalendarCell {
            date,
            membership: Membership::Current,
            is_today: date == today,
            entry: by_day.get(&day).copied(),
        });
        last = date;
    }

    // Finish the partial week, then keep rolling forward to a full six rows.
    while cells.len() < GRID_CELLS {
        let Some(next) = last.next_day() else {
            break;
        };
        cells.push(CalendarCell::filler(next, Membership::Next));
        last = next;
    }

    cells
}

/// Plain-text month view: `*` marks a day with an entry, brackets mark today,
/// filler days are left blank.
pub fn render_month_text(cells: &[CalendarCell<'_>], cursor: MonthCursor) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "{} {}", cursor.month(), cursor.year());
    let header: String = WEEKDAY_LABELS
        .iter()
        .map(|label| format!(" {label}  "))
        .collect();
    let _ = writeln!(&mut out, "{}", header.trim_end());
    for week in cells.chunks(7) {
        let row: String = week.iter().map(render_cell).collect();
        let _ = writeln!(&mut out, "{}", row.trim_end());
    }
    out
}

fn render_cell(cell: &CalendarCell<'_>) -> String {
    if !cell.is_current() {
        return " ".repeat(5);
    }
    let (open, close) = if cell.is_today { ('[', ']') } else { (' ', ' ') };
    let mark = if cell.entry.is_some() { '*' } else { ' ' };
    format!("{open}{:>2}{mark}{close}", cell.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::entry;
    use time::macros::{date, datetime};

    fn count(cells: &[CalendarCell<'_>], membership: Membership) -> usize {
        cells.iter().filter(|c| c.membership == membership).count()
    }

    #[test]
    fn every_month_has_forty_two_cells() {
        let now = datetime!(2024-01-01 00:00 UTC);
        let mut cursor = MonthCursor::new(2023, Month::January).expect("cursor");
        for _ in 0..36 {
            let cells = build_month_grid(&[], cursor, now);
            assert_eq!(cells.len(), GRID_CELLS, "{cursor:?}");
            assert_eq!(
                count(&cells, Membership::Current),
                usize::from(cursor.days_in_month())
            );
            assert_eq!(
                count(&cells, Membership::Previous),
                usize::from(cursor.first_weekday())
            );
            cursor = cursor.next();
        }
    }

    #[test]
    fn february_of_a_common_year_starting_wednesday() {
        let cursor = MonthCursor::new(2023, Month::February).expect("cursor");
        assert_eq!(cursor.first_weekday(), 3);
        let cells = build_month_grid(&[], cursor, datetime!(2023-02-10 09:00 UTC));

        assert_eq!(count(&cells, Membership::Previous), 3);
        assert_eq!(count(&cells, Membership::Current), 28);
        assert_eq!(count(&cells, Membership::Next), 11);
        assert_eq!(cells[0].date, date!(2023 - 01 - 29));
        assert_eq!(cells[41].date, date!(2023 - 03 - 11));
        assert!(cells.iter().filter(|c| c.is_today).all(|c| c.day() == 10));
    }

    #[test]
    fn padding_rolls_over_into_the_next_year() {
        let cursor = MonthCursor::new(2024, Month::December).expect("cursor");
        let cells = build_month_grid(&[], cursor, datetime!(2024-12-01 00:00 UTC));
        let last = cells.last().expect("cells");
        assert_eq!(last.year(), 2025);
        assert_eq!(last.month0(), 0);
        assert_eq!(last.membership, Membership::Next);
    }

    #[test]
    fn same_day_entries_collapse_to_the_last_indexed() {
        let entries = vec![
            entry(2, datetime!(2024-05-15 20:00 UTC)),
            entry(1, datetime!(2024-05-15 08:00 UTC)),
        ];
        let cursor = MonthCursor::new(2024, Month::May).expect("cursor");
        let cells = build_month_grid(&entries, cursor, datetime!(2024-05-20 00:00 UTC));

        let occupied: Vec<_> = cells.iter().filter_map(|c| c.entry).collect();
        assert_eq!(occupied.len(), 1);
        assert_eq!(occupied[0].id.0, 1);
    }

    #[test]
    fn entry_days_follow_the_offset_of_now() {
        let entries = vec![entry(1, datetime!(2024-04-30 20:00 UTC))];
        let cursor = MonthCursor::new(2024, Month::May).expect("cursor");

        let utc = build_month_grid(&entries, cursor, datetime!(2024-05-02 00:00 UTC));
        assert!(utc.iter().all(|c| c.entry.is_none()));

        let seoul = build_month_grid(&entries, cursor, datetime!(2024-05-02 09:00 +9));
        let hit = seoul.iter().find(|c| c.entry.is_some()).expect("entry cell");
        assert_eq!(hit.date, date!(2024 - 05 - 01));
    }

    #[test]
    fn filler_cells_never_carry_entries() {
        let entries = vec![entry(1, datetime!(2023-01-30 12:00 UTC))];
        let cursor = MonthCursor::new(2023, Month::February).expect("cursor");
        let cells = build_month_grid(&entries, cursor, datetime!(2023-01-30 12:00 UTC));
        assert!(cells.iter().all(|c| c.entry.is_none() && !c.is_today));
    }

    #[test]
    fn identical_inputs_give_identical_grids() {
        let entries = vec![entry(1, datetime!(2024-02-29 12:00 UTC))];
        let cursor = MonthCursor::new(2024, Month::February).expect("cursor");
        let now = datetime!(2024-02-29 13:00 UTC);
        assert_eq!(
            build_month_grid(&entries, cursor, now),
            build_month_grid(&entries, cursor, now)
        );
    }

    #[test]
    fn cursor_navigation_wraps_years() {
        let january = MonthCursor::new(2024, Month::January).expect("cursor");
        assert_eq!(
            january.previous(),
            MonthCursor::new(2023, Month::December).expect("cursor")
        );
        assert_eq!(january.previous().next(), january);
        assert_eq!(january.month0(), 0);
        assert_eq!(
            MonthCursor::containing(date!(2024 - 03 - 17)),
            MonthCursor::new(2024, Month::March).expect("cursor")
        );
    }

    #[test]
    fn february_length_follows_leap_years() {
        let days = |year| MonthCursor::new(year, Month::February).expect("cursor").days_in_month();
        assert_eq!(days(2023), 28);
        assert_eq!(days(2024), 29);
        assert_eq!(days(1900), 28);
        assert_eq!(days(2000), 29);
    }

    #[test]
    fn text_rendering_marks_entries_and_today() {
        let entries = vec![
            entry(1, datetime!(2023-02-03 12:00 UTC)),
            entry(2, datetime!(2023-02-15 07:00 UTC)),
        ];
        let cursor = MonthCursor::new(2023, Month::February).expect("cursor");
        let cells = build_month_grid(&entries, cursor, datetime!(2023-02-15 12:00 UTC));
        let text = render_month_text(&cells, cursor);
        insta::assert_debug_snapshot!(text.lines().collect::<Vec<_>>(), @r###"
        [
            "February 2023",
            " Su   Mo   Tu   We   Th   Fr   Sa",
            "                 1    2    3*   4",
            "  5    6    7    8    9   10   11",
            " 12   13   14  [15*] 16   17   18",
            " 19   20   21   22   23   24   25",
            " 26   27   28",
            "",
        ]
        "###);
    }
}
