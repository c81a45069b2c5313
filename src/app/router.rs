use strum::{Display, EnumIter, IntoEnumIterator};
use time::OffsetDateTime;

use crate::calendar::{build_month_grid, year_progress, CalendarCell, MonthCursor, YearProgress};
use crate::journaling::{EntryLifecycleController, ReconciliationPoller};
use crate::model::{Analysis, Entry, EntrySnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum View {
    #[strum(serialize = "Write")]
    Compose,
    #[strum(serialize = "Write")]
    ComposeWithResult,
    #[strum(serialize = "Entries")]
    List,
    #[strum(serialize = "Calendar")]
    Calendar,
}

impl View {
    /// Views reachable from the tab bar. The result view is reached only by
    /// saving an entry.
    pub fn tabs() -> impl Iterator<Item = View> {
        View::iter().filter(|view| *view != View::ComposeWithResult)
    }

    pub fn tab_index(self) -> usize {
        match self {
            View::Compose | View::ComposeWithResult => 0,
            View::List => 1,
            View::Calendar => 2,
        }
    }
}

/// Where the tracked entry's analysis stands, as the result view shows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultStatus<'a> {
    Pending,
    NothingToReport(&'a Analysis),
    Ready(&'a Analysis),
}

impl<'a> ResultStatus<'a> {
    pub fn of(entry: &'a Entry) -> Self {
        match &entry.analysis {
            None => ResultStatus::Pending,
            Some(analysis) if analysis.has_content() => ResultStatus::Ready(analysis),
            Some(analysis) => ResultStatus::NothingToReport(analysis),
        }
    }
}

/// Read-only inputs a projection may borrow.
#[derive(Clone, Copy)]
pub struct ProjectionContext<'a> {
    pub controller: &'a EntryLifecycleController,
    pub snapshot: &'a EntrySnapshot,
    pub cursor: MonthCursor,
    pub now: OffsetDateTime,
}

#[derive(Debug)]
pub enum Projection<'a> {
    Compose {
        saving: bool,
        failure: Option<&'a str>,
    },
    ComposeWithResult {
        saving: bool,
        entry: &'a Entry,
        status: ResultStatus<'a>,
    },
    List {
        entries: &'a [Entry],
        pending: usize,
    },
    Calendar {
        cursor: MonthCursor,
        cells: Vec<CalendarCell<'a>>,
        progress: YearProgress,
    },
}

#[derive(Debug)]
pub struct ViewRouter {
    active: View,
}

impl Default for ViewRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewRouter {
    pub fn new() -> Self {
        Self {
            active: View::Compose,
        }
    }

    pub fn active(&self) -> View {
        self.active
    }

    /// A save succeeded; show its result under the form.
    pub fn show_result(&mut self) {
        self.active = View::ComposeWithResult;
    }

    /// Navigate. Leaving the result view tears it down: the tracked entry is
    /// dismissed and its refresh lineage cancelled.
    pub fn select(
        &mut self,
        view: View,
        controller: &mut EntryLifecycleController,
        poller: &mut ReconciliationPoller,
    ) {
        if self.active == view {
            return;
        }
        if self.active == View::ComposeWithResult {
            controller.dismiss();
            poller.cancel_tracked();
        }
        tracing::debug!(from = %self.active, to = %view, "view changed");
        self.active = view;
    }

    pub fn projection<'a>(&self, ctx: ProjectionContext<'a>) -> Projection<'a> {
        match self.active {
            View::Compose => compose(ctx.controller),
            View::ComposeWithResult => match ctx.controller.tracked() {
                Some(entry) => Projection::ComposeWithResult {
                    saving: ctx.controller.is_saving(),
                    entry,
                    status: ResultStatus::of(entry),
                },
                None => compose(ctx.controller),
            },
            View::List => Projection::List {
                entries: ctx.snapshot.entries(),
                pending: ctx.snapshot.pending_count(),
            },
            View::Calendar => Projection::Calendar {
                cursor: ctx.cursor,
                cells: build_month_grid(ctx.snapshot.entries(), ctx.cursor, ctx.now),
                progress: year_progress(
                    ctx.snapshot.entries(),
                    ctx.cursor.year(),
                    ctx.now.offset(),
                ),
            },
        }
    }
}

fn compose(controller: &EntryLifecycleController) -> Projection<'_> {
    Projection::Compose {
        saving: controller.is_saving(),
        failure: controller.failure(),
    }
}
