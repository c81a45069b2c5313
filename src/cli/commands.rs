use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use time::format_description::well_known::Rfc3339;
use time::{Month, OffsetDateTime, UtcOffset};

use crate::app::App;
use crate::calendar::{
    build_month_grid, render_month_text, year_progress, MonthCursor, DAYS_PER_YEAR,
};
use crate::config::AppConfig;
use crate::journaling::{EntryLifecycleController, ReconciliationPoller};
use crate::model::{Analysis, AnalysisSummary, Entry, EntryId, EntrySnapshot};
use crate::repository::{Backend, EntryRepository};
use crate::storage::SqliteEntryRepository;

const MAX_QUESTION_CHARS: usize = 500;
const PREVIEW_CHARS: usize = 60;
const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

const DEMO_MOOD: &str = "피곤하지만 뿌듯";
const DEMO_BODY: &str = "새벽에 두 번 깨어서 안아주느라 잠이 부족했지만, 아침에 일어나 가족이 함께 20분 정도 느긋하게 \
스트레칭하고 산책을 하니 아이가 금방 웃음을 되찾았다. 오전에는 동화책을 함께 읽어주며 \
조용한 시간을 보냈고, 점심 이후에는 30분 정도 블록 놀이를 하며 혼자 집중하는 모습을 지켜봤다. \
최근 들어 오후 낮잠 시간이 뒤로 밀리는 경향이 있어서 오늘은 평소보다 15분 일찍 준비해 보았고, \
잠들기 전에 좋아하는 자장가를 반복해서 불러 주니 비교적 빠르게 잠들었다.";

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    /// How the day felt, in a few words
    #[arg(long)]
    pub mood: String,
    /// Entry text. If omitted, read from stdin.
    #[arg(long)]
    pub body: Option<String>,
    /// Keep polling until the entry's analysis arrives
    #[arg(long)]
    pub wait: bool,
    /// Give up waiting after this many seconds (at most one day)
    #[arg(
        long,
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..=MAX_WAIT_SECS)
    )]
    pub wait_timeout: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Number of entries to print (1-100, defaults to `entries.list_limit`)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub limit: Option<u16>,
}

#[derive(Args, Debug, Clone)]
pub struct CalendarArgs {
    /// Year to show (defaults to the current year)
    #[arg(long)]
    pub year: Option<i32>,
    /// Month to show, 1-12 (defaults to the current month)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12))]
    pub month: Option<u8>,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Number of days to look back (1-90, defaults to `analysis.default_range_days`)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=90))]
    pub range: Option<u32>,
    /// Question to focus the analysis on
    #[arg(long)]
    pub question: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AttachAnalysisArgs {
    /// Entry identifier
    pub id: i64,
    /// Path to the analysis JSON document
    pub file: PathBuf,
}

pub fn run_tui(app: &mut App) -> Result<()> {
    app.run()
}

pub fn new_entry(config: Arc<AppConfig>, backend: &Backend, args: NewArgs) -> Result<()> {
    let body = match args.body {
        Some(body) => body,
        None => read_stdin()?.unwrap_or_default(),
    };
    let offset = config.calendar.offset();
    let repo = backend.as_repository();

    let deadline = if args.wait {
        Some(wait_deadline(Instant::now(), args.wait_timeout)?)
    } else {
        None
    };

    let mut controller = EntryLifecycleController::new();
    let entry = controller
        .submit(repo, &args.mood, &body)
        .context("saving entry")?;
    print!("{}", format_saved(&entry, offset));

    let Some(deadline) = deadline.filter(|_| entry.is_pending()) else {
        return Ok(());
    };
    let mut poller = ReconciliationPoller::new(&config.polling, config.entries.list_limit);
    eprintln!("Waiting for analysis of entry {}...", entry.id);
    match wait_for_analysis(repo, &mut controller, &mut poller, entry, deadline) {
        Some(resolved) => {
            if let Some(analysis) = &resolved.analysis {
                print!("{}", format_analysis(analysis));
            }
            Ok(())
        }
        None => bail!("analysis did not arrive within {}s", args.wait_timeout),
    }
}

fn wait_deadline(now: Instant, secs: u64) -> Result<Instant> {
    now.checked_add(Duration::from_secs(secs))
        .ok_or_else(|| anyhow!("wait timeout of {secs}s is too large"))
}

/// Drive the tracked lineage until the controller resolves or `deadline`
/// passes. Returns the analysed entry.
fn wait_for_analysis(
    repo: &dyn EntryRepository,
    controller: &mut EntryLifecycleController,
    poller: &mut ReconciliationPoller,
    entry: Entry,
    deadline: Instant,
) -> Option<Entry> {
    let mut snapshot = EntrySnapshot::default();
    snapshot.upsert(entry.clone());
    let now = Instant::now();
    poller.track(&entry, now);
    poller.on_snapshot_changed(&snapshot, now);

    loop {
        let Some(due) = poller.next_due() else {
            return None;
        };
        let now = Instant::now();
        if due > deadline {
            poller.cancel_all();
            return None;
        }
        if due > now {
            thread::sleep(due - now);
        }
        let report = poller.poll(Instant::now(), repo, controller, &mut snapshot);
        if report.resolved.is_some() {
            poller.cancel_all();
            return controller.tracked().cloned();
        }
    }
}

pub fn list_entries(config: Arc<AppConfig>, backend: &Backend, args: ListArgs) -> Result<()> {
    let limit = args
        .limit
        .map(usize::from)
        .unwrap_or(config.entries.list_limit);
    let output = run_list(backend.as_repository(), limit, config.calendar.offset())?;
    print!("{output}");
    Ok(())
}

fn run_list(repo: &dyn EntryRepository, limit: usize, offset: UtcOffset) -> Result<String> {
    let entries = repo.list_entries(Some(limit)).context("listing entries")?;
    Ok(format_entries(&entries, offset))
}

fn format_entries(entries: &[Entry], offset: UtcOffset) -> String {
    if entries.is_empty() {
        return "No entries yet.\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let status = if entry.is_pending() {
            "analysis pending"
        } else {
            "analysed"
        };
        let _ = writeln!(
            &mut out,
            "{}  {}  {}  [{status}]",
            entry.id,
            format_timestamp(entry.created_at, offset),
            entry.mood
        );
        let _ = writeln!(&mut out, "    {}", preview(&entry.body));
    }
    out
}

pub fn show_calendar(config: Arc<AppConfig>, backend: &Backend, args: CalendarArgs) -> Result<()> {
    let now = OffsetDateTime::now_utc().to_offset(config.calendar.offset());
    let cursor = resolve_cursor(args.year, args.month, now)?;
    let entries = backend
        .list_entries(Some(config.entries.list_limit))
        .context("listing entries")?;
    print!("{}", render_calendar(&entries, cursor, now));
    Ok(())
}

fn resolve_cursor(
    year: Option<i32>,
    month: Option<u8>,
    now: OffsetDateTime,
) -> Result<MonthCursor> {
    let year = year.unwrap_or(now.year());
    let month = match month {
        Some(number) => Month::try_from(number).context("parsing month")?,
        None => now.month(),
    };
    MonthCursor::new(year, month).ok_or_else(|| anyhow!("year {year} is out of range"))
}

fn render_calendar(entries: &[Entry], cursor: MonthCursor, now: OffsetDateTime) -> String {
    let cells = build_month_grid(entries, cursor, now);
    let mut out = render_month_text(&cells, cursor);
    let progress = year_progress(entries, cursor.year(), now.offset());
    let _ = writeln!(
        &mut out,
        "\n{}: {} of {DAYS_PER_YEAR} days written ({:.1}%)",
        progress.year,
        progress.distinct_days,
        progress.percent()
    );
    out
}

pub fn analyze_entries(config: Arc<AppConfig>, backend: &Backend, args: AnalyzeArgs) -> Result<()> {
    let range = args.range.unwrap_or(config.analysis.default_range_days);
    let output = run_analyze(backend.as_repository(), range, args.question.as_deref())?;
    print!("{output}");
    Ok(())
}

fn run_analyze(repo: &dyn EntryRepository, range: u32, question: Option<&str>) -> Result<String> {
    let question = question.map(str::trim).filter(|q| !q.is_empty());
    if let Some(question) = question {
        if question.chars().count() > MAX_QUESTION_CHARS {
            bail!("question must be at most {MAX_QUESTION_CHARS} characters");
        }
    }
    let summary = repo
        .analyze_range(range, question)
        .context("requesting range analysis")?;
    Ok(format_summary(&summary))
}

fn format_summary(summary: &AnalysisSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "Last {} days, {} entries",
        summary.window.range_days, summary.window.entry_count
    );
    out.push('\n');
    out.push_str(&format_analysis(&summary.analysis));
    out
}

pub fn attach_analysis(backend: &Backend, args: AttachAnalysisArgs) -> Result<()> {
    let Backend::Local(repo) = backend else {
        bail!("attach-analysis needs the local backend (set backend = \"local\")");
    };
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("reading analysis {}", args.file.display()))?;
    println!("{}", run_attach(repo, EntryId(args.id), &raw)?);
    Ok(())
}

fn run_attach(repo: &SqliteEntryRepository, id: EntryId, raw: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(raw).context("parsing analysis json")?;
    let analysis = Analysis::from_value(value);
    if repo.record_analysis(id, &analysis)? {
        Ok(format!("Analysis stored for entry {id}."))
    } else {
        Ok(format!("Entry {id} already has an analysis; left unchanged."))
    }
}

pub fn send_demo_entry(backend: &Backend) -> Result<()> {
    let entry = backend
        .create_entry(DEMO_MOOD, DEMO_BODY)
        .context("sending demo entry")?;
    tracing::info!(id = %entry.id, "demo entry sent");
    let offset = entry.created_at.offset();
    print!("{}", format_saved(&entry, offset));
    Ok(())
}

pub fn check_health(backend: &Backend) -> Result<()> {
    match backend {
        Backend::Http(repo) => {
            let health = repo
                .health()
                .with_context(|| format!("querying {}", repo.base_url()))?;
            let mut line = format!("{}: {}", repo.base_url(), health.status);
            if let Some(app) = &health.app {
                let _ = write!(&mut line, " ({app})");
            }
            if let Some(time) = &health.time {
                let _ = write!(&mut line, " at {time}");
            }
            println!("{line}");
        }
        Backend::Local(repo) => {
            let stats = repo.run_wal_health_check()?;
            println!(
                "{}: ok (wal frames {}, checkpointed {}, busy {})",
                repo.database_path().display(),
                stats.wal_frames,
                stats.checkpointed_frames,
                stats.busy_frames
            );
        }
    }
    Ok(())
}

fn format_saved(entry: &Entry, offset: UtcOffset) -> String {
    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "Saved entry {} at {}",
        entry.id,
        format_timestamp(entry.created_at, offset)
    );
    match &entry.analysis {
        None => {
            let _ = writeln!(&mut out, "Analysis pending.");
        }
        Some(analysis) => out.push_str(&format_analysis(analysis)),
    }
    out
}

fn format_analysis(analysis: &Analysis) -> String {
    let mut out = String::new();
    if !analysis.has_content() {
        let _ = writeln!(&mut out, "Nothing to report yet.");
    }
    for section in analysis.populated_sections() {
        let _ = writeln!(&mut out, "{}", section.title());
        for item in &section.items {
            let _ = writeln!(&mut out, "  - {}", item.summary());
        }
    }
    if !analysis.sources().is_empty() {
        let _ = writeln!(&mut out, "Sources");
        for source in analysis.sources() {
            match &source.url {
                Some(url) => {
                    let _ = writeln!(&mut out, "  - {} <{url}>", source.label);
                }
                None => {
                    let _ = writeln!(&mut out, "  - {}", source.label);
                }
            }
        }
    }
    let _ = writeln!(&mut out, "({})", analysis.disclaimer_or_default());
    out
}

fn format_timestamp(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

fn preview(body: &str) -> String {
    let first_line = body.lines().next().unwrap_or_default().trim();
    let mut chars = first_line.chars();
    let mut short: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() || body.trim().lines().nth(1).is_some() {
        short.push('…');
    }
    short
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}
