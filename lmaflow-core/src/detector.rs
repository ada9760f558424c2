//! Detection of weight-ticket activity that still has to be declared.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::model::{
    DeclarationId, DeclarationStatus, DeclarationType, LmaDeclaration, WasteStreamNumber,
    WeightTicketLine,
};
use crate::period::{self, Period};
use crate::ports::{DeclarationStore, DetectionWrite, StoreError, WeightTicketLines};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Sums over all lines of one waste stream in one period.
pub struct LineTotals {
    /// Sum of the weights in kilograms.
    pub total_weight: i64,
    /// Number of lines.
    pub total_shipments: u32,
    /// Distinct carriers in first-seen order.
    pub transporters: Vec<String>,
}

impl LineTotals {
    fn add(&mut self, line: &WeightTicketLine) {
        self.total_weight = self.total_weight.saturating_add(line.weight_kg);
        self.total_shipments = self.total_shipments.saturating_add(1);
        if !self.transporters.contains(&line.carrier) {
            self.transporters.push(line.carrier.clone());
        }
    }
}

/// Group lines by waste stream and period and total each group.
#[must_use]
pub fn aggregate_lines(
    lines: &[WeightTicketLine],
) -> BTreeMap<(WasteStreamNumber, Period), LineTotals> {
    let mut groups: BTreeMap<(WasteStreamNumber, Period), LineTotals> = BTreeMap::new();
    for line in lines {
        groups
            .entry((line.waste_stream_number.clone(), line.period()))
            .or_default()
            .add(line);
    }
    groups
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// What a detection run did.
pub struct DetectionReport {
    /// Keys that had no declaration yet.
    pub created: usize,
    /// Waiting declarations replaced because their figures changed.
    pub replaced: usize,
    /// Waiting declarations that already reported the current figures.
    pub unchanged: usize,
    /// Keys left alone because a submitted or final declaration exists.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
/// Declaration a detection run wants to write, before it has an id.
pub struct PlannedDeclaration {
    /// Waiting rows the declaration replaces.
    pub superseded: Vec<DeclarationId>,
    /// The declaration; its id is assigned when the plan is applied.
    pub declaration: LmaDeclaration,
}

#[derive(Debug, Clone, PartialEq)]
/// Complete outcome of the read and aggregate phase of a detection run.
pub struct DetectionPlan {
    /// Cutoff period the plan was computed for.
    pub cutoff: Period,
    /// Declarations to write.
    pub changes: Vec<PlannedDeclaration>,
    /// Counts per decision.
    pub report: DetectionReport,
}

impl DetectionPlan {
    /// Whether applying the plan would write anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Turns undeclared weight-ticket lines into declarations waiting for approval.
pub struct DeclarationDetector {
    lines: Arc<dyn WeightTicketLines>,
    declarations: Arc<dyn DeclarationStore>,
}

impl DeclarationDetector {
    /// Create a detector over the given ports.
    #[must_use]
    pub fn new(lines: Arc<dyn WeightTicketLines>, declarations: Arc<dyn DeclarationStore>) -> Self {
        Self {
            lines,
            declarations,
        }
    }

    /// Read and aggregate all lines up to the cutoff period and decide, per
    /// waste stream and period, what has to be written. Writes nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when reading fails.
    pub fn plan(&self, now: DateTime<Utc>) -> Result<DetectionPlan, StoreError> {
        let cutoff = period::cutoff(now.date_naive());
        let lines = self.lines.lines_weighed_until(cutoff)?;
        let groups = aggregate_lines(&lines);

        let mut report = DetectionReport::default();
        let mut changes = Vec::new();

        for ((waste_stream_number, period), totals) in groups {
            if period > cutoff {
                continue;
            }

            let existing = self.declarations.find_by_key(&waste_stream_number, period)?;
            if existing
                .iter()
                .any(|declaration| declaration.status != DeclarationStatus::WaitingApproval)
            {
                debug!(%waste_stream_number, %period, "declaration already submitted, skipping");
                report.skipped += 1;
                continue;
            }

            let declaration_type = if self.declarations.has_completed(&waste_stream_number)? {
                DeclarationType::MonthlyReceival
            } else {
                DeclarationType::FirstReceival
            };

            let candidate = LmaDeclaration {
                id: DeclarationId(String::new()),
                waste_stream_number,
                period: period.to_string(),
                transporters: totals.transporters,
                total_weight: totals.total_weight,
                total_shipments: totals.total_shipments,
                declaration_type,
                status: DeclarationStatus::WaitingApproval,
                amice_uuid: None,
                errors: Vec::new(),
                created_at: now,
            };

            if let [current] = existing.as_slice()
                && current.same_content(&candidate)
            {
                report.unchanged += 1;
                continue;
            }

            if existing.is_empty() {
                report.created += 1;
            } else {
                report.replaced += 1;
            }
            changes.push(PlannedDeclaration {
                superseded: existing.into_iter().map(|current| current.id).collect(),
                declaration: candidate,
            });
        }

        Ok(DetectionPlan {
            cutoff,
            changes,
            report,
        })
    }

    /// Aggregate all lines up to the cutoff period and create or refresh the
    /// waiting declarations for them.
    ///
    /// Every decision is taken before the first write; the writes are applied
    /// in one batch.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when reading or writing fails. Nothing is
    /// written in that case.
    pub fn detect_and_create_for_late_weight_tickets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DetectionReport, StoreError> {
        let plan = self.plan(now)?;

        let writes = plan
            .changes
            .into_iter()
            .map(|planned| {
                let mut declaration = planned.declaration;
                declaration.id = self.declarations.next_declaration_id()?;
                Ok(DetectionWrite {
                    superseded: planned.superseded,
                    declaration,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if !writes.is_empty() {
            self.declarations.apply_detection(&writes)?;
        }

        let report = plan.report;
        info!(
            cutoff = %plan.cutoff,
            created = report.created,
            replaced = report.replaced,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "late weight ticket detection finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn line(stream: &str, kg: i64, carrier: &str, day: (i32, u32, u32)) -> WeightTicketLine {
        WeightTicketLine {
            waste_stream_number: WasteStreamNumber(stream.to_owned()),
            weight_kg: kg,
            carrier: carrier.to_owned(),
            weighed_at: NaiveDate::from_ymd_opt(day.0, day.1, day.2)
                .and_then(|date| date.and_hms_opt(9, 30, 0))
                .expect("valid timestamp"),
        }
    }

    #[test]
    fn aggregation_sums_per_stream_and_period() {
        let lines = vec![
            line("A", 1_000, "truck-1", (2025, 10, 3)),
            line("A", 2_500, "truck-2", (2025, 10, 17)),
            line("A", 400, "truck-1", (2025, 11, 2)),
            line("B", 700, "truck-1", (2025, 10, 9)),
        ];

        let groups = aggregate_lines(&lines);

        let october = Period::new(10, 2025).expect("period");
        let totals = groups
            .get(&(WasteStreamNumber("A".to_owned()), october))
            .expect("group for A in October");
        assert_eq!(totals.total_weight, 3_500);
        assert_eq!(totals.total_shipments, 2);
        assert_eq!(totals.transporters, vec!["truck-1", "truck-2"]);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn aggregation_of_nothing_is_empty() {
        assert!(aggregate_lines(&[]).is_empty());
    }
}
