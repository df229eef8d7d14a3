//! Historical reconciliation since the stored cursor

use tracing::{debug, info, warn};

use super::context::RunContext;
use super::types::Origin;
use super::verify::{touches_pair, transaction_error};
use crate::state::Cursor;

/// Outcome of one backfill pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    /// Signature records examined
    pub scanned: usize,
    pub emitted: usize,
    /// Stopped at the stored cursor rather than the cap or end of history
    pub reached_cursor: bool,
    /// An RPC failure cut the pass short
    pub aborted: bool,
}

/// Page the account's history newest-first and emit every transaction that
/// touches the pair, stopping at the cap or at the stored cursor.
///
/// RPC failures are logged and end the pass; they never reach the caller.
pub async fn backfill(ctx: &RunContext, since: &Cursor) -> BackfillReport {
    let page_size = ctx.config.backfill_page_size;
    let limit = ctx.config.backfill_limit;
    let mut report = BackfillReport::default();
    let mut before: Option<String> = None;

    info!(
        pair = %ctx.pair.short(),
        since_slot = since.last_position,
        limit,
        "backfill started"
    );

    'pages: while report.scanned < limit {
        if !ctx.is_active() {
            break;
        }

        let request = page_size.min(limit - report.scanned);
        let page = match ctx
            .rpc
            .get_signatures_for_address(ctx.pair.account(), request, before.as_deref())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(pair = %ctx.pair.short(), error = %e, "backfill page failed, aborting pass");
                report.aborted = true;
                break;
            }
        };

        if page.is_empty() {
            break;
        }
        let exhausted = page.len() < request;
        before = page.last().map(|record| record.signature.clone());

        for record in page {
            if !ctx.is_active() || report.scanned >= limit {
                break 'pages;
            }

            let at_cursor = since.last_identifier.as_deref() == Some(record.signature.as_str());
            if at_cursor || (since.last_position > 0 && record.slot <= since.last_position) {
                report.reached_cursor = true;
                break 'pages;
            }

            report.scanned += 1;

            if ctx.is_seen(&record.signature) {
                continue;
            }

            let tx = match ctx.rpc.get_transaction(&record.signature).await {
                Ok(tx) => tx,
                Err(e) => {
                    warn!(signature = %record.signature, error = %e, "detail fetch failed, skipping");
                    continue;
                }
            };

            if !touches_pair(&tx, &ctx.pair) {
                debug!(signature = %record.signature, "pair not present, skipping");
                continue;
            }

            let error = record
                .err
                .as_ref()
                .map(|e| e.to_string())
                .or_else(|| transaction_error(&tx));
            let note = record.memo.clone().unwrap_or_default();

            if ctx.emit(Origin::Backfill, record.slot, &record.signature, error, note) {
                report.emitted += 1;
            }
        }

        if exhausted {
            break;
        }
    }

    info!(
        pair = %ctx.pair.short(),
        scanned = report.scanned,
        emitted = report.emitted,
        reached_cursor = report.reached_cursor,
        aborted = report.aborted,
        "backfill finished"
    );

    report
}
