use super::{AdaptationSet, Manifest, MergeOutcome, Period, PeriodId, Representation};
use crate::error::PlayerResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub segments: MergeOutcome,
    pub new_periods: usize,
    pub new_representations: usize,
}

impl MergeReport {
    pub fn is_unchanged(&self) -> bool {
        self.segments.is_unchanged() && self.new_periods == 0 && self.new_representations == 0
    }
}

impl Manifest {
    /// Merges a refreshed live document into this snapshot.
    ///
    /// Entities are matched by id, so a representation keeps its identity across
    /// refreshes. Periods that are no longer announced are dropped once they end
    /// before the refreshed window starts, except `playing`.
    pub fn merge(
        &self,
        refreshed: Manifest,
        playing: Option<&PeriodId>,
    ) -> PlayerResult<(Manifest, MergeReport)> {
        let mut report = MergeReport::default();
        let window_start = refreshed.periods.first().map(|p| p.start);

        let mut periods: Vec<Period> = self
            .periods
            .iter()
            .filter(|old| refreshed.period(&old.id).is_none())
            .filter(|old| {
                Some(&old.id) == playing
                    || match (old.end(), window_start) {
                        (Some(end), Some(start)) => end > start,
                        _ => true,
                    }
            })
            .cloned()
            .map(|mut gone| {
                // no longer announced, so it can not grow
                gone.close_segment_lists();
                gone
            })
            .collect();

        for period in refreshed.periods {
            match self.period(&period.id) {
                Some(known) => periods.push(merge_period(known, period, &mut report)?),
                None => {
                    report.new_periods += 1;
                    periods.push(period);
                }
            }
        }
        periods.sort_by_key(|p| p.start);

        let manifest = Manifest {
            periods,
            is_live: refreshed.is_live,
            min_update_period: refreshed.min_update_period,
            duration: refreshed.duration,
        };
        Ok((manifest, report))
    }
}

fn merge_period(known: &Period, refreshed: Period, report: &mut MergeReport) -> PlayerResult<Period> {
    let mut merged = known.clone();
    merged.duration = refreshed.duration;

    for set in refreshed.adaptation_sets {
        match merged.adaptation_sets.iter_mut().find(|a| a.id == set.id) {
            Some(target) => merge_adaptation_set(target, set, report)?,
            None => {
                report.new_representations += set.representations.len();
                merged.adaptation_sets.push(set);
            }
        }
    }
    Ok(merged)
}

fn merge_adaptation_set(
    target: &mut AdaptationSet,
    refreshed: AdaptationSet,
    report: &mut MergeReport,
) -> PlayerResult<()> {
    for Representation {
        id,
        bandwidth,
        segments,
    } in refreshed.representations
    {
        match target.representations.iter_mut().find(|r| r.id == id) {
            Some(known) => {
                known.bandwidth = bandwidth;
                report.segments += known.segments.merge(segments)?;
            }
            None => {
                report.new_representations += 1;
                target.representations.push(Representation {
                    id,
                    bandwidth,
                    segments,
                });
            }
        }
    }
    Ok(())
}
