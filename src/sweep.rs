//! Daily pass over every active user's page of a given day, writing a
//! summary into the page's `Description` property. On Mondays the previous
//! seven summaries are folded into one weekly page.

use crate::codec::{self, Block, NotionContent};
use crate::crypto::CredentialCipher;
use crate::db::{self, Pool};
use crate::dispatch::Notifier;
use crate::model::{MigrationStatus, UserConfig};
use crate::notion::DocumentApi;
use crate::sync::GuestWorkspace;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Utc, Weekday};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const SUMMARY_PROPERTY: &str = "Description";
pub const WEEKLY_TAG: &str = "Weekly";

/// Turns a day's note text into a short summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, date: NaiveDate, text: &str) -> Result<String>;

    /// `daily` holds one `### <date>` section per summarized day.
    async fn summarize_week(&self, week_start: NaiveDate, daily: &str) -> Result<String>;
}

/// Deterministic digest: entries, to-do counts and tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestSummarizer;

#[async_trait]
impl Summarizer for DigestSummarizer {
    async fn summarize(&self, date: NaiveDate, text: &str) -> Result<String> {
        Ok(digest(date, text))
    }

    async fn summarize_week(&self, _week_start: NaiveDate, daily: &str) -> Result<String> {
        let days = daily.lines().filter(|l| l.starts_with("### ")).count();
        Ok(format!(
            "{} {} summarized.\n{}",
            days,
            if days == 1 { "day" } else { "days" },
            daily.trim_end()
        ))
    }
}

pub fn digest(date: NaiveDate, text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let headings = lines.iter().filter(|l| l.starts_with("### ")).count();
    // the first entry of a day is written without a heading
    let untitled_first = lines
        .iter()
        .find(|l| !l.is_empty())
        .is_some_and(|l| !l.starts_with("### "));
    let entries = headings + usize::from(untitled_first);
    let open = lines.iter().filter(|l| l.starts_with("- [ ] ")).count();
    let done = lines.iter().filter(|l| l.starts_with("- [x] ")).count();
    let (_, tags) = codec::parse_tags(text);

    let mut out = format!(
        "{}: {} {}",
        date.format("%Y-%m-%d"),
        entries,
        if entries == 1 { "entry" } else { "entries" }
    );
    if open + done > 0 {
        out.push_str(&format!(", to-dos {done} done / {open} open"));
    }
    if let Some(line) = codec::tag_line(&tags) {
        out.push_str(". Tags: ");
        out.push_str(&line);
    }
    out
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct DailySweep {
    pool: Pool,
    notion: Arc<dyn DocumentApi>,
    cipher: Arc<CredentialCipher>,
    guest: GuestWorkspace,
    summarizer: Arc<dyn Summarizer>,
    notifier: Arc<dyn Notifier>,
    utc_offset: FixedOffset,
}

impl DailySweep {
    pub fn new(
        pool: Pool,
        notion: Arc<dyn DocumentApi>,
        cipher: Arc<CredentialCipher>,
        guest: GuestWorkspace,
        summarizer: Arc<dyn Summarizer>,
        notifier: Arc<dyn Notifier>,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            pool,
            notion,
            cipher,
            guest,
            summarizer,
            notifier,
            utc_offset,
        }
    }

    /// Summarize `date` for every active user, one at a time. A failing user
    /// is counted and logged; the sweep carries on.
    #[instrument(skip_all, fields(%date))]
    pub async fn run_once(&self, date: NaiveDate) -> Result<SweepReport> {
        let users = db::list_active_configs(&self.pool).await?;
        let mut report = SweepReport::default();
        for cfg in &users {
            match self.sweep_user(cfg, date).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(user = %cfg.external_user_id, error = %format!("{e:#}"), "sweep failed for user");
                    report.failed += 1;
                }
            }
        }
        info!(processed = report.processed, skipped = report.skipped, failed = report.failed, "sweep finished");
        Ok(report)
    }

    /// Credential and container for a user the sweep may touch.
    fn target(&self, cfg: &UserConfig) -> Result<Option<(String, String)>> {
        if cfg.migration_status == MigrationStatus::Migrating {
            return Ok(None);
        }
        let Some(container) = cfg.container_id.clone() else {
            return Ok(None);
        };
        let token = if cfg.is_guest {
            self.guest.admin_token.clone()
        } else {
            self.cipher
                .decrypt(&cfg.credential)
                .context("decrypt stored credential")?
        };
        Ok(Some((token, container)))
    }

    async fn sweep_user(&self, cfg: &UserConfig, date: NaiveDate) -> Result<bool> {
        let Some((token, container)) = self.target(cfg)? else {
            return Ok(false);
        };

        let Some(page_id) = self.notion.find_page_by_date(&token, &container, date).await? else {
            return Ok(false);
        };
        let raw = self.notion.retrieve_block_children(&token, &page_id).await?;
        let blocks: Vec<Block> = raw.iter().filter_map(Block::from_api).collect();
        let text = codec::from_blocks(&blocks);
        if text.trim().is_empty() {
            return Ok(false);
        }

        let summary = self.summarizer.summarize(date, &text).await?;
        if !self
            .notion
            .update_page_property(&token, &page_id, SUMMARY_PROPERTY, &summary)
            .await?
        {
            bail!("summary update rejected for page {page_id}");
        }
        Ok(true)
    }

    /// Fold the daily summaries of the seven days before `today` into one
    /// weekly page per active user.
    #[instrument(skip_all, fields(%today))]
    pub async fn run_weekly(&self, today: NaiveDate) -> Result<SweepReport> {
        let users = db::list_active_configs(&self.pool).await?;
        let mut report = SweepReport::default();
        for cfg in &users {
            match self.weekly_user(cfg, today).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(user = %cfg.external_user_id, error = %format!("{e:#}"), "weekly summary failed for user");
                    report.failed += 1;
                }
            }
        }
        info!(processed = report.processed, skipped = report.skipped, failed = report.failed, "weekly summary finished");
        Ok(report)
    }

    async fn weekly_user(&self, cfg: &UserConfig, today: NaiveDate) -> Result<bool> {
        let Some((token, container)) = self.target(cfg)? else {
            return Ok(false);
        };

        let mut daily = String::new();
        for back in (1..=7).rev() {
            let Some(date) = today.checked_sub_days(Days::new(back)) else {
                continue;
            };
            let Some(page_id) = self.notion.find_page_by_date(&token, &container, date).await? else {
                continue;
            };
            let summary = self
                .notion
                .get_page_property(&token, &page_id, SUMMARY_PROPERTY)
                .await?;
            if !summary.trim().is_empty() {
                daily.push_str(&format!("### {}\n{}\n", date.format("%Y-%m-%d"), summary.trim()));
            }
        }
        if daily.is_empty() {
            return Ok(false);
        }

        let (start, end) = week_bounds(today);
        let title = weekly_title(start, end);
        let body = self.summarizer.summarize_week(start, &daily).await?;
        let content = NotionContent::new(title.clone(), body, vec![WEEKLY_TAG.to_string()]);
        let created = self.notion.create_page(&token, &container, &content).await?;
        if !created.ok {
            bail!("weekly page rejected: {}", created.raw);
        }
        info!(page_id = ?created.page_id, "weekly page created");

        if let Err(e) = self
            .notifier
            .notify(&cfg.external_user_id, &format!("Your weekly summary is ready:\n{title}"))
            .await
        {
            warn!(user = %cfg.external_user_id, error = %format!("{e:#}"), "weekly notification failed");
        }
        Ok(true)
    }

    /// Run forever, sweeping the previous local day each day at `hour`.
    pub async fn run_daily(self: Arc<Self>, hour: u32) {
        loop {
            let now = Utc::now().with_timezone(&self.utc_offset);
            let wait = next_run_delay(now, hour);
            info!(hour, wait_secs = wait.as_secs(), "next sweep scheduled");
            tokio::time::sleep(wait).await;

            let today = Utc::now().with_timezone(&self.utc_offset).date_naive();
            let Some(yesterday) = today.checked_sub_days(Days::new(1)) else {
                continue;
            };
            if let Err(e) = self.run_once(yesterday).await {
                error!(error = %format!("{e:#}"), "sweep run failed");
            }
            if today.weekday() == Weekday::Mon {
                if let Err(e) = self.run_weekly(today).await {
                    error!(error = %format!("{e:#}"), "weekly run failed");
                }
            }
        }
    }
}

/// First and last day of the seven days before `today`.
fn week_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today.checked_sub_days(Days::new(7)).unwrap_or(today);
    let end = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    (start, end)
}

/// `Weekly summary 2026-W42 (10.12 - 10.18)`, week number taken from the first day.
pub fn weekly_title(start: NaiveDate, end: NaiveDate) -> String {
    let week = start.iso_week();
    format!(
        "Weekly summary {}-W{:02} ({} - {})",
        week.year(),
        week.week(),
        start.format("%m.%d"),
        end.format("%m.%d")
    )
}

/// Time from `now` until the next local `hour:00`.
pub fn next_run_delay(now: DateTime<FixedOffset>, hour: u32) -> Duration {
    let today = now.date_naive();
    let target_on = |day: NaiveDate| {
        day.and_hms_opt(hour.min(23), 0, 0)
            .and_then(|naive| naive.and_local_timezone(*now.offset()).single())
    };
    let next = match target_on(today) {
        Some(t) if t > now => Some(t),
        _ => today
            .checked_add_days(Days::new(1))
            .and_then(target_on),
    };
    next.and_then(|t| (t - now).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 18, h, m, 0)
            .unwrap()
    }

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        assert_eq!(next_run_delay(at(6, 30), 8), Duration::from_secs(90 * 60));
        assert_eq!(next_run_delay(at(8, 0), 8), Duration::from_secs(24 * 3600));
        assert_eq!(next_run_delay(at(9, 0), 8), Duration::from_secs(23 * 3600));
    }

    #[test]
    fn digest_counts_entries_todos_and_tags() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let text = "### standup\n- [ ] write report\n- [x] ship fix #work\n### lunch\nramen #food #work";
        assert_eq!(
            digest(date, text),
            "2026-10-17: 2 entries, to-dos 1 done / 1 open. Tags: #work #food"
        );
        assert_eq!(digest(date, "just a line"), "2026-10-17: 1 entry");
    }

    #[test]
    fn weekly_title_names_the_iso_week() {
        let (start, end) = week_bounds(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert_eq!(weekly_title(start, end), "Weekly summary 2026-W42 (10.12 - 10.18)");
        let (start, end) = week_bounds(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        assert_eq!(weekly_title(start, end), "Weekly summary 2026-W01 (12.29 - 01.04)");
    }
}
