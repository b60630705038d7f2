use crate::collector::FixCollector;
use crate::fix::{Fix, Report};

/// Pick the most accurate fix. Scans in buffer order and lets a later fix
/// replace the current best on `<=`, so exact ties go to the newest fix.
pub fn select_best(fixes: &[Fix]) -> Option<&Fix> {
    fixes.iter().reduce(|best, candidate| {
        if candidate.accuracy <= best.accuracy {
            candidate
        } else {
            best
        }
    })
}

/// Build the report for the window that just closed and empty the buffer.
///
/// Falls back to the collector's last known fix when the window produced
/// nothing, and to [`Report::NoData`] when no fix was ever accepted.
pub fn produce_report(collector: &mut FixCollector) -> Report {
    let fixes = collector.take_buffer();

    let report = match select_best(&fixes) {
        Some(best) => Report::BestFix { fix: best.clone() },
        None => match collector.last_known() {
            Some(last) => {
                log::info!("no fix this window, using last known location");
                Report::LastKnown { fix: last.clone() }
            }
            None => Report::NoData,
        },
    };

    match report.fix() {
        Some(fix) => log::info!(
            "report from {} buffered fix(es): lat={:.6} lon={:.6} accuracy={:.1}m",
            fixes.len(),
            fix.latitude,
            fix.longitude,
            fix.accuracy
        ),
        None => log::info!("report: no location data available"),
    }

    report
}
