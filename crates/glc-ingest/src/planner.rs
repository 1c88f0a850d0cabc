//! Ingestion planning: which surface serves which part of a gap.
//!
//! Calendar months fully contained in a gap come from the bulk archive (one
//! CDN download covers thousands of bars); the residual edges go to REST.
//! Months whose archives later turn out to 404 or be corrupt are simply
//! re-detected as gaps and picked up by the REST filler.

use glc_core::{Gap, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Archive,
    Rest,
}

/// One fetch-and-load step of an ingestion plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    pub source: SourceKind,
    pub start_micros: i64,
    pub end_micros: i64,
}

/// Split `gaps` into archive and REST steps. Steps are emitted in gap order,
/// archive-before-residuals within each gap.
pub fn plan_ingestion(gaps: &[Gap]) -> Vec<PlanStep> {
    let mut steps = Vec::new();
    for gap in gaps {
        // Largest run of whole calendar months inside the gap.
        let month_start = Timeframe::Mo1.align_up(gap.start_micros);
        let month_end = Timeframe::Mo1.align_down(gap.end_micros);
        if month_start < month_end {
            if gap.start_micros < month_start {
                steps.push(PlanStep {
                    source: SourceKind::Rest,
                    start_micros: gap.start_micros,
                    end_micros: month_start,
                });
            }
            steps.push(PlanStep {
                source: SourceKind::Archive,
                start_micros: month_start,
                end_micros: month_end,
            });
            if month_end < gap.end_micros {
                steps.push(PlanStep {
                    source: SourceKind::Rest,
                    start_micros: month_end,
                    end_micros: gap.end_micros,
                });
            }
        } else {
            steps.push(PlanStep {
                source: SourceKind::Rest,
                start_micros: gap.start_micros,
                end_micros: gap.end_micros,
            });
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAN1: i64 = 1_704_067_200_000_000; // 2024-01-01
    const FEB1: i64 = 1_706_745_600_000_000; // 2024-02-01
    const MAR1: i64 = 1_709_251_200_000_000; // 2024-03-01
    const HOUR: i64 = 3_600_000_000;

    #[test]
    fn whole_months_go_to_archive() {
        let steps = plan_ingestion(&[Gap::new(JAN1, MAR1)]);
        assert_eq!(
            steps,
            vec![PlanStep {
                source: SourceKind::Archive,
                start_micros: JAN1,
                end_micros: MAR1,
            }]
        );
    }

    #[test]
    fn residual_edges_go_to_rest() {
        let start = JAN1 - 5 * HOUR; // late December
        let end = FEB1 + 3 * HOUR; // early February
        let steps = plan_ingestion(&[Gap::new(start, end)]);
        assert_eq!(
            steps,
            vec![
                PlanStep {
                    source: SourceKind::Rest,
                    start_micros: start,
                    end_micros: JAN1,
                },
                PlanStep {
                    source: SourceKind::Archive,
                    start_micros: JAN1,
                    end_micros: FEB1,
                },
                PlanStep {
                    source: SourceKind::Rest,
                    start_micros: FEB1,
                    end_micros: end,
                },
            ]
        );
    }

    #[test]
    fn sub_month_gap_is_rest_only() {
        let steps = plan_ingestion(&[Gap::new(JAN1 + HOUR, JAN1 + 10 * HOUR)]);
        assert_eq!(
            steps,
            vec![PlanStep {
                source: SourceKind::Rest,
                start_micros: JAN1 + HOUR,
                end_micros: JAN1 + 10 * HOUR,
            }]
        );
    }

    #[test]
    fn gap_spanning_month_boundary_without_a_full_month() {
        // Last hours of January + first hours of February: no full month.
        let start = FEB1 - 4 * HOUR;
        let end = FEB1 + 6 * HOUR;
        let steps = plan_ingestion(&[Gap::new(start, end)]);
        assert_eq!(
            steps,
            vec![PlanStep {
                source: SourceKind::Rest,
                start_micros: start,
                end_micros: end,
            }]
        );
    }

    #[test]
    fn multiple_gaps_keep_order() {
        let steps = plan_ingestion(&[
            Gap::new(JAN1 + HOUR, JAN1 + 2 * HOUR),
            Gap::new(FEB1, MAR1),
        ]);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].source, SourceKind::Rest);
        assert_eq!(steps[1].source, SourceKind::Archive);
    }
}
