use log::{debug, error, warn};

use crate::reconciler::error::ReconcilerError;

pub fn handle_reconciliation_result(
    controller: &str,
    key: &str,
    result: &Result<(), ReconcilerError>,
    requeues: u32,
) {
    match result {
        Ok(()) => debug!("Reconciled '{key}' in {controller} controller"),
        Err(err) if err.is_permanent() => {
            error!("{controller} reconciliation failed for '{key}', dropping it: {err}")
        }
        Err(err) => warn!(
            "{controller} reconciliation failed for '{key}' (retry {}): {err}",
            requeues + 1
        ),
    }
}
