//! FPPP sync pipeline: extraction from FORM MASTER, the Finance Klaes
//! comment join, destination reconciliation, and the daily scheduler.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use fppp_core::{derive_waktu_produksi, header_row, normalize_null, Cell, ColumnMap, FpppRecord};
use fppp_store::{TabularStore, ValueInputMode};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "fppp-sync";

pub const FORM_MASTER_RANGE: &str = "FORM MASTER!A:CZ";
pub const COMMENT_RANGE: &str = "Comment!A:Z";
pub const DEST_TAB: &str = "FPPP Data";
pub const FINANCE_STAGE_MARKER: &str = "Finance Klaes";

/// 08:00 daily, evaluated in the configured time zone.
const DAILY_CRON: &str = "0 0 8 * * *";

const FORM_MASTER_COLUMNS: &[&str] = &[
    "business_id",
    "status",
    "Title Form",
    "Divisi",
    "Tgl FPPP",
    "No. FPPP",
    "Deadline Pengiriman",
    "Deadline Pengambilan",
    "Waktu Produksi",
];

const COMMENT_COLUMNS: &[&str] = &["business_id", "show_name_true", "end_time"];

/// Reference-number allow-list. Matched as a case-insensitive substring
/// anywhere in the value; "AST" shadowing "ASTA" is redundant but
/// harmless.
const ALLOWED_REFERENCE_TOKENS: &[&str] = &["AST", "ASTA", "RSD", "RAE", "RAS"];

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub credentials_path: PathBuf,
    pub source_sheet_id: String,
    pub dest_sheet_id: String,
    pub timezone: String,
    pub write_strategy: WriteStrategy,
}

impl SyncConfig {
    /// Loads configuration from the environment (a `.env` file is
    /// honored when present). Missing required settings are fatal.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let credentials_path = require_env("GOOGLE_APPLICATION_CREDENTIALS")?.into();
        let source_sheet_id = require_env("SOURCE_SHEET_ID")?;
        let dest_sheet_id = require_env("DEST_SHEET_ID")?;
        let timezone = optional_env("TIMEZONE").unwrap_or_else(|| "Asia/Jakarta".to_string());
        let write_strategy = match optional_env("WRITE_STRATEGY") {
            Some(value) => value.parse()?,
            None => WriteStrategy::Upsert,
        };

        Ok(Self {
            credentials_path,
            source_sheet_id,
            dest_sheet_id,
            timezone,
            write_strategy,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{name} is required"))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// How the destination is reconciled. The two strategies have different
/// row-position semantics and are never meant to alternate against the
/// same destination tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    Upsert,
    ClearAndReplace,
}

impl FromStr for WriteStrategy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "upsert" => Ok(Self::Upsert),
            "replace" | "clear-and-replace" => Ok(Self::ClearAndReplace),
            other => bail!("unknown write strategy {other:?} (expected upsert or replace)"),
        }
    }
}

/// True when the reference number contains any allow-listed token.
pub fn has_allowed_reference(no_fppp: &str) -> bool {
    let upper = no_fppp.to_uppercase();
    ALLOWED_REFERENCE_TOKENS.iter().any(|token| upper.contains(token))
}

/// Extracts typed records from raw FORM MASTER rows (row 0 is the
/// header). Pure and order-preserving; per-row data problems degrade to
/// empty fields, never to errors.
pub fn extract_records(rows: &[Vec<Cell>]) -> Vec<FpppRecord> {
    if rows.len() < 2 {
        return Vec::new();
    }
    let cols = ColumnMap::resolve(&rows[0], FORM_MASTER_COLUMNS);

    let mut records: Vec<FpppRecord> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for row in &rows[1..] {
        let business_id = cols.text(row, "business_id");
        if business_id.is_empty() {
            continue;
        }

        let status = cols.text(row, "status").trim().to_uppercase();
        if !matches!(status.as_str(), "COMPLETE" | "COMPLETED" | "RUNNING") {
            continue;
        }

        let no_fppp = cols.text(row, "No. FPPP").trim().to_string();
        if !has_allowed_reference(&no_fppp) {
            continue;
        }

        let tgl_fppp = normalize_null(&cols.text(row, "Tgl FPPP"));
        let mut deadline = normalize_null(&cols.text(row, "Deadline Pengiriman"));
        let mut waktu_produksi = normalize_null(&cols.text(row, "Waktu Produksi"));

        if deadline.is_empty() {
            deadline = normalize_null(&cols.text(row, "Deadline Pengambilan"));
        }
        if waktu_produksi.is_empty() {
            waktu_produksi = derive_waktu_produksi(&tgl_fppp, &deadline);
        }

        let record = FpppRecord {
            business_id,
            title_form: cols.text(row, "Title Form"),
            divisi: cols.text(row, "Divisi"),
            tgl_fppp,
            no_fppp,
            deadline_pengiriman: deadline,
            waktu_produksi,
            ..Default::default()
        };

        match by_id.get(&record.business_id) {
            // duplicated source key: last row wins, position stays
            Some(&at) => records[at] = record,
            None => {
                by_id.insert(record.business_id.clone(), records.len());
                records.push(record);
            }
        }
    }

    records
}

/// Lookups built from the Comment tab, both keyed by business id and
/// both restricted to rows carrying the Finance Klaes stage marker.
/// They are populated by the same predicate and always agree on
/// membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentLookups {
    pub end_times: HashMap<String, String>,
    pub stages: HashMap<String, String>,
}

pub fn comment_lookups(rows: &[Vec<Cell>]) -> CommentLookups {
    let mut lookups = CommentLookups::default();
    if rows.len() < 2 {
        return lookups;
    }
    let cols = ColumnMap::resolve(&rows[0], COMMENT_COLUMNS);

    for row in &rows[1..] {
        let stage = cols.text(row, "show_name_true").trim().to_string();
        if !stage.eq_ignore_ascii_case(FINANCE_STAGE_MARKER) {
            continue;
        }
        let business_id = cols.text(row, "business_id");
        if business_id.is_empty() {
            continue;
        }
        lookups
            .end_times
            .insert(business_id.clone(), cols.text(row, "end_time"));
        lookups.stages.insert(business_id, stage);
    }

    lookups
}

/// Left-joins the comment lookups onto extracted records in place.
pub fn merge_comments(records: &mut [FpppRecord], lookups: &CommentLookups) {
    for record in records.iter_mut() {
        if let Some(end_time) = lookups.end_times.get(&record.business_id) {
            record.end_time = end_time.clone();
        }
        if let Some(stage) = lookups.stages.get(&record.business_id) {
            record.finance_stage = stage.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub updated: usize,
    pub appended: usize,
}

/// Maps business id to its 1-based destination sheet row, skipping the
/// header at row 1. Rebuilt from current destination state on every
/// reconciliation.
pub fn destination_index(key_rows: &[Vec<Cell>]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, row) in key_rows.iter().enumerate().skip(1) {
        let business_id = row.first().map(Cell::to_text).unwrap_or_default();
        if !business_id.is_empty() {
            index.insert(business_id, i + 1);
        }
    }
    index
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertPlan {
    pub updates: Vec<(String, Vec<Vec<Cell>>)>,
    pub appends: Vec<Vec<Cell>>,
}

/// Partitions incoming records into in-place updates (key already in
/// the destination) and ordered appends. Never deletes: destination
/// rows whose keys left the source persist as stale rows.
pub fn plan_upsert(index: &HashMap<String, usize>, records: &[FpppRecord]) -> UpsertPlan {
    let mut plan = UpsertPlan::default();
    for record in records {
        match index.get(&record.business_id) {
            Some(row) => plan
                .updates
                .push((format!("'{DEST_TAB}'!A{row}"), vec![record.to_row()])),
            None => plan.appends.push(record.to_row()),
        }
    }
    plan
}

/// Applies one of the two reconciliation strategies to the destination
/// tab.
pub struct DestinationWriter {
    store: Arc<dyn TabularStore>,
}

impl DestinationWriter {
    pub fn new(store: Arc<dyn TabularStore>) -> Self {
        Self { store }
    }

    pub async fn write(
        &self,
        strategy: WriteStrategy,
        records: &[FpppRecord],
    ) -> Result<WriteOutcome> {
        match strategy {
            WriteStrategy::Upsert => self.upsert(records).await,
            WriteStrategy::ClearAndReplace => self.clear_and_write(records).await,
        }
    }

    async fn upsert(&self, records: &[FpppRecord]) -> Result<WriteOutcome> {
        let key_range = format!("'{DEST_TAB}'!A:A");
        let index = match self.store.get_range(&key_range).await {
            Ok(rows) => destination_index(&rows),
            // a fresh destination reads the same as a failed read
            Err(err) => {
                warn!(error = %err, "destination key column unreadable; treating as empty");
                HashMap::new()
            }
        };

        if index.is_empty() {
            self.store
                .update_range(
                    &format!("'{DEST_TAB}'!A1"),
                    vec![header_row()],
                    ValueInputMode::UserEntered,
                )
                .await
                .context("writing destination header")?;
            info!("wrote header row to empty destination '{DEST_TAB}'");
        }

        let plan = plan_upsert(&index, records);
        let outcome = WriteOutcome {
            updated: plan.updates.len(),
            appended: plan.appends.len(),
        };

        if !plan.updates.is_empty() {
            self.store
                .batch_update(plan.updates, ValueInputMode::UserEntered)
                .await
                .context("updating existing destination rows")?;
        }
        if !plan.appends.is_empty() {
            self.store
                .append_rows(
                    &format!("'{DEST_TAB}'!A1"),
                    plan.appends,
                    ValueInputMode::UserEntered,
                )
                .await
                .context("appending new destination rows")?;
        }

        info!(
            updated = outcome.updated,
            appended = outcome.appended,
            "reconciled destination '{DEST_TAB}'"
        );
        Ok(outcome)
    }

    async fn clear_and_write(&self, records: &[FpppRecord]) -> Result<WriteOutcome> {
        self.store
            .clear_range(&format!("'{DEST_TAB}'"))
            .await
            .context("clearing destination sheet")?;

        let mut rows = vec![header_row()];
        rows.extend(records.iter().map(FpppRecord::to_row));
        self.store
            .update_range(&format!("'{DEST_TAB}'!A1"), rows, ValueInputMode::UserEntered)
            .await
            .context("writing destination sheet")?;

        info!(rows = records.len(), "rewrote destination '{DEST_TAB}' from scratch");
        Ok(WriteOutcome {
            updated: 0,
            appended: records.len(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub extracted: usize,
    pub matched: usize,
    pub updated: usize,
    pub appended: usize,
}

/// Sequences read FORM MASTER -> read Comment -> merge -> write. Any
/// step failure aborts the run with that step's context; nothing is
/// retried within a run (the next scheduled trigger retries naturally).
pub struct SyncPipeline {
    source: Arc<dyn TabularStore>,
    writer: DestinationWriter,
    strategy: WriteStrategy,
    run_gate: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn TabularStore>,
        destination: Arc<dyn TabularStore>,
        strategy: WriteStrategy,
    ) -> Self {
        Self {
            source,
            writer: DestinationWriter::new(destination),
            strategy,
            run_gate: Mutex::new(()),
        }
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let _guard = self.run_gate.lock().await;
        self.run_locked().await
    }

    /// Single-flight entry point for scheduled triggers: a trigger that
    /// fires while a run is still in progress is dropped and logged,
    /// never queued or run concurrently.
    pub async fn run_guarded(&self) -> Result<Option<SyncRunSummary>> {
        let Ok(_guard) = self.run_gate.try_lock() else {
            warn!("previous sync still running; dropping this trigger");
            return Ok(None);
        };
        self.run_locked().await.map(Some)
    }

    async fn run_locked(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        info!("starting data sync");

        let rows = self
            .source
            .get_range(FORM_MASTER_RANGE)
            .await
            .context("reading FORM MASTER")?;
        let mut records = extract_records(&rows);
        info!(records = records.len(), "read records from FORM MASTER");

        let comment_rows = self
            .source
            .get_range(COMMENT_RANGE)
            .await
            .context("reading Comment")?;
        let lookups = comment_lookups(&comment_rows);
        info!(comments = lookups.end_times.len(), "read Finance Klaes comments");

        merge_comments(&mut records, &lookups);
        let matched = records.iter().filter(|r| !r.end_time.is_empty()).count();

        let outcome = self
            .writer
            .write(self.strategy, &records)
            .await
            .context("writing destination")?;

        let finished_at = Utc::now();
        info!(total = records.len(), "data sync completed successfully");
        Ok(SyncRunSummary {
            started_at,
            finished_at,
            extracted: records.len(),
            matched,
            updated: outcome.updated,
            appended: outcome.appended,
        })
    }
}

/// Builds a scheduler with the daily 08:00 sync job in `timezone`.
/// Start it with `JobScheduler::start`; the caller owns shutdown.
pub async fn build_scheduler(pipeline: Arc<SyncPipeline>, timezone: &str) -> Result<JobScheduler> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown timezone {timezone:?}"))?;

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async_tz(DAILY_CRON, tz, move |_uuid, _lock| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            match pipeline.run_guarded().await {
                Ok(Some(summary)) => {
                    info!(records = summary.extracted, "scheduled sync finished");
                }
                Ok(None) => {}
                Err(err) => error!(error = %err, "scheduled sync failed"),
            }
        })
    })
    .context("creating daily sync job")?;
    sched.add(job).await.context("adding daily sync job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<Cell> {
        cells.iter().copied().map(Cell::from).collect()
    }

    fn form_master_header() -> Vec<Cell> {
        row(&[
            "business_id",
            "status",
            "Title Form",
            "Divisi",
            "Tgl FPPP",
            "No. FPPP",
            "Deadline Pengiriman",
            "Deadline Pengambilan",
            "Waktu Produksi",
        ])
    }

    fn valid_row(bid: &str) -> Vec<Cell> {
        row(&[
            bid,
            "COMPLETE",
            "Form",
            "Produksi",
            "2026-01-10",
            "042/FPPP/ASTA/01/2026",
            "2026-01-15",
            "",
            "",
        ])
    }

    #[test]
    fn rows_without_business_id_are_dropped() {
        let rows = vec![form_master_header(), valid_row("B1"), valid_row("")];
        let records = extract_records(&rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].business_id, "B1");
    }

    #[test]
    fn status_filter_keeps_only_complete_completed_running() {
        let mut rows = vec![form_master_header()];
        for (bid, status) in [
            ("B1", "COMPLETE"),
            ("B2", "completed"),
            ("B3", " Running "),
            ("B4", "DRAFT"),
            ("B5", ""),
            ("B6", "CANCELLED"),
        ] {
            let mut r = valid_row(bid);
            r[1] = Cell::text(status);
            rows.push(r);
        }
        let records = extract_records(&rows);
        let ids: Vec<_> = records.iter().map(|r| r.business_id.as_str()).collect();
        assert_eq!(ids, ["B1", "B2", "B3"]);
    }

    #[test]
    fn reference_filter_matches_substrings_anywhere() {
        assert!(has_allowed_reference("042/FPPP/ASTA/01/2026"));
        assert!(has_allowed_reference("042/fppp/rsd/01/2026"));
        assert!(has_allowed_reference("AST-standalone"));
        assert!(!has_allowed_reference("042/FPPP/XYZ/01/2026"));
        assert!(!has_allowed_reference(""));
    }

    #[test]
    fn reference_filter_drops_rows() {
        let mut rows = vec![form_master_header(), valid_row("B1")];
        let mut rejected = valid_row("B2");
        rejected[5] = Cell::text("042/FPPP/XYZ/01/2026");
        rows.push(rejected);
        let records = extract_records(&rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].business_id, "B1");
    }

    #[test]
    fn null_placeholders_are_normalized_in_all_three_fields() {
        let mut r = valid_row("B1");
        r[4] = Cell::text("NULL");
        r[6] = Cell::text("null");
        r[8] = Cell::text("Null");
        let records = extract_records(&vec![form_master_header(), r]);
        assert_eq!(records[0].tgl_fppp, "");
        assert_eq!(records[0].deadline_pengiriman, "");
        // both dates unusable, so the duration stays empty too
        assert_eq!(records[0].waktu_produksi, "");
    }

    #[test]
    fn deadline_falls_back_to_pengambilan() {
        let mut r = valid_row("B1");
        r[6] = Cell::text("null");
        r[7] = Cell::text("2026-01-20");
        let records = extract_records(&vec![form_master_header(), r]);
        assert_eq!(records[0].deadline_pengiriman, "2026-01-20");
        assert_eq!(records[0].waktu_produksi, "10 hari");
    }

    #[test]
    fn fallback_deadline_is_null_normalized_too() {
        let mut r = valid_row("B1");
        r[6] = Cell::text("");
        r[7] = Cell::text("null");
        let records = extract_records(&vec![form_master_header(), r]);
        assert_eq!(records[0].deadline_pengiriman, "");
        assert_eq!(records[0].waktu_produksi, "");
    }

    #[test]
    fn existing_waktu_produksi_is_copied_not_derived() {
        let mut r = valid_row("B1");
        r[8] = Cell::text("3 hari");
        let records = extract_records(&vec![form_master_header(), r]);
        assert_eq!(records[0].waktu_produksi, "3 hari");
    }

    #[test]
    fn missing_waktu_produksi_is_derived_from_dates() {
        let records = extract_records(&vec![form_master_header(), valid_row("B1")]);
        assert_eq!(records[0].waktu_produksi, "5 hari");
    }

    #[test]
    fn unparseable_source_date_leaves_duration_empty() {
        let mut r = valid_row("B1");
        r[4] = Cell::text("soon");
        let records = extract_records(&vec![form_master_header(), r]);
        assert_eq!(records[0].waktu_produksi, "");
    }

    #[test]
    fn duplicate_business_id_last_row_wins_in_place() {
        let mut second = valid_row("B1");
        second[2] = Cell::text("Revised");
        let rows = vec![
            form_master_header(),
            valid_row("B1"),
            valid_row("B2"),
            second,
        ];
        let records = extract_records(&rows);
        let ids: Vec<_> = records.iter().map(|r| r.business_id.as_str()).collect();
        assert_eq!(ids, ["B1", "B2"]);
        assert_eq!(records[0].title_form, "Revised");
    }

    #[test]
    fn extraction_handles_missing_optional_columns() {
        // no Waktu Produksi or Deadline Pengambilan columns at all
        let rows = vec![
            row(&[
                "business_id",
                "status",
                "No. FPPP",
                "Tgl FPPP",
                "Deadline Pengiriman",
            ]),
            row(&["B1", "RUNNING", "01/RAE/2026", "2026-01-10", "2026-01-12"]),
        ];
        let records = extract_records(&rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].waktu_produksi, "2 hari");
        assert_eq!(records[0].title_form, "");
    }

    #[test]
    fn empty_or_header_only_source_yields_no_records() {
        assert!(extract_records(&[]).is_empty());
        assert!(extract_records(&[form_master_header()]).is_empty());
    }

    fn comment_header() -> Vec<Cell> {
        row(&["business_id", "show_name_true", "end_time"])
    }

    #[test]
    fn comment_lookups_filter_on_finance_klaes() {
        let rows = vec![
            comment_header(),
            row(&["B1", "Finance Klaes", "2026-01-20 09:00"]),
            row(&["B2", "Gudang", "2026-01-21 09:00"]),
            row(&["B3", " finance klaes ", "2026-01-22 09:00"]),
            row(&["", "Finance Klaes", "2026-01-23 09:00"]),
        ];
        let lookups = comment_lookups(&rows);
        assert_eq!(lookups.end_times.len(), 2);
        assert_eq!(lookups.end_times["B1"], "2026-01-20 09:00");
        assert_eq!(lookups.end_times["B3"], "2026-01-22 09:00");
        assert_eq!(lookups.stages["B3"], "finance klaes");
        assert!(!lookups.end_times.contains_key("B2"));
    }

    #[test]
    fn comment_lookups_last_row_wins() {
        let rows = vec![
            comment_header(),
            row(&["B1", "Finance Klaes", "early"]),
            row(&["B1", "Finance Klaes", "late"]),
        ];
        let lookups = comment_lookups(&rows);
        assert_eq!(lookups.end_times["B1"], "late");
    }

    #[test]
    fn lookup_maps_always_agree_on_membership() {
        let rows = vec![
            comment_header(),
            row(&["B1", "Finance Klaes", "t1"]),
            row(&["B2", "Finance Klaes", "t2"]),
        ];
        let lookups = comment_lookups(&rows);
        let mut end_keys: Vec<_> = lookups.end_times.keys().collect();
        let mut stage_keys: Vec<_> = lookups.stages.keys().collect();
        end_keys.sort();
        stage_keys.sort();
        assert_eq!(end_keys, stage_keys);
    }

    #[test]
    fn merge_sets_both_fields_and_is_idempotent() {
        let mut records = vec![
            FpppRecord {
                business_id: "B1".into(),
                ..Default::default()
            },
            FpppRecord {
                business_id: "B2".into(),
                ..Default::default()
            },
        ];
        let rows = vec![comment_header(), row(&["B1", "Finance Klaes", "done"])];
        let lookups = comment_lookups(&rows);

        merge_comments(&mut records, &lookups);
        let once = records.clone();
        merge_comments(&mut records, &lookups);
        assert_eq!(records, once);

        assert_eq!(records[0].end_time, "done");
        assert_eq!(records[0].finance_stage, "Finance Klaes");
        assert_eq!(records[1].end_time, "");
        assert_eq!(records[1].finance_stage, "");
    }

    #[test]
    fn destination_index_skips_header_and_maps_sheet_rows() {
        let rows = vec![
            row(&["business_id"]),
            row(&["B1"]),
            row(&["B2"]),
            row(&[""]),
            row(&["B3"]),
        ];
        let index = destination_index(&rows);
        assert_eq!(index.len(), 3);
        assert_eq!(index["B1"], 2);
        assert_eq!(index["B2"], 3);
        assert_eq!(index["B3"], 5);
    }

    #[test]
    fn plan_upsert_partitions_updates_and_ordered_appends() {
        let mut index = HashMap::new();
        index.insert("B1".to_string(), 5);
        index.insert("B2".to_string(), 6);

        let records = vec![
            FpppRecord {
                business_id: "B1".into(),
                ..Default::default()
            },
            FpppRecord {
                business_id: "B3".into(),
                ..Default::default()
            },
            FpppRecord {
                business_id: "B4".into(),
                ..Default::default()
            },
        ];
        let plan = plan_upsert(&index, &records);

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].0, "'FPPP Data'!A5");
        assert_eq!(plan.appends.len(), 2);
        assert_eq!(plan.appends[0][0].to_text(), "B3");
        assert_eq!(plan.appends[1][0].to_text(), "B4");
        // B2 is untouched by the plan; its stale row persists
    }

    #[test]
    fn write_strategy_parses_from_config_values() {
        assert_eq!("upsert".parse::<WriteStrategy>().unwrap(), WriteStrategy::Upsert);
        assert_eq!(
            "Replace".parse::<WriteStrategy>().unwrap(),
            WriteStrategy::ClearAndReplace
        );
        assert_eq!(
            "clear-and-replace".parse::<WriteStrategy>().unwrap(),
            WriteStrategy::ClearAndReplace
        );
        assert!("wipe".parse::<WriteStrategy>().is_err());
    }
}
