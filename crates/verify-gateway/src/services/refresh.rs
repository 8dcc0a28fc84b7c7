//! Refresh coordination.
//!
//! `RefreshCoordinator::refresh` renews a token whose access lease lapsed.
//! It never touches the cache: saving the replacement is the caller's job.
//! There are no retries; a failed renewal is reported once with the
//! provider's status and body.
//!
//! # Concurrent refreshes
//!
//! Two requests presenting the same lapsed token may both renew it; each
//! replacement is saved under its own key and both clients keep working.
//! With single-flight enabled, concurrent refreshes of one access token share
//! a single upstream call and its result instead. The shared slot is
//! released as soon as that call finishes or is dropped, whichever comes
//! first, so a cancelled caller never pins a stale result.

use crate::models::TokenData;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_refresh;
use crate::services::idp_client::{TokenRenewer, UpstreamFailure};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

/// Body of the failure reported when renewal exceeds its time budget.
pub const REFRESH_TIMEOUT_BODY: &str = "refresh timed out";

/// Why a refresh failed, as reported to the verification state machine.
pub type RefreshFailure = UpstreamFailure;

type SharedOutcome = Arc<OnceCell<Result<TokenData, RefreshFailure>>>;

type FlightTable = Mutex<HashMap<String, SharedOutcome>>;

/// Owns one in-flight slot; dropping it frees the slot if it still holds `cell`.
struct FlightSlot<'a> {
    table: &'a FlightTable,
    key: &'a str,
    cell: &'a SharedOutcome,
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(self.key)
            .is_some_and(|existing| Arc::ptr_eq(existing, self.cell))
        {
            table.remove(self.key);
        }
    }
}

/// Renews lapsed tokens through a `TokenRenewer`.
pub struct RefreshCoordinator {
    renewer: Arc<dyn TokenRenewer>,
    timeout: Duration,
    /// In-flight renewals keyed by access token; `None` when single-flight is off.
    in_flight: Option<FlightTable>,
}

impl RefreshCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `renewer` - Upstream renewal operation
    /// * `timeout` - Upper bound on one renewal
    /// * `single_flight` - Coalesce concurrent refreshes of the same token
    pub fn new(renewer: Arc<dyn TokenRenewer>, timeout: Duration, single_flight: bool) -> Self {
        Self {
            renewer,
            timeout,
            in_flight: single_flight.then(|| Mutex::new(HashMap::new())),
        }
    }

    /// Renew `current` using its refresh token.
    ///
    /// # Errors
    ///
    /// `RefreshFailure` on rejection, network failure, malformed response or
    /// timeout (`status: None`, body `"refresh timed out"`).
    #[instrument(skip_all, name = "gw.refresh", fields(token = %hash_for_correlation(&current.access_token)))]
    pub async fn refresh(&self, current: &TokenData) -> Result<TokenData, RefreshFailure> {
        match &self.in_flight {
            Some(table) => self.coalesced(table, current).await,
            None => self.renew_bounded(current).await,
        }
    }

    async fn coalesced(
        &self,
        table: &FlightTable,
        current: &TokenData,
    ) -> Result<TokenData, RefreshFailure> {
        let cell = table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(current.access_token.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let key = current.access_token.as_str();
        let flight = &cell;
        cell.get_or_init(|| async move {
            // Only the caller running the renewal holds the slot; it is
            // released when the renewal ends, even if that caller is dropped
            let _slot = FlightSlot {
                table,
                key,
                cell: flight,
            };
            self.renew_bounded(current).await
        })
        .await
        .clone()
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        self.in_flight.as_ref().map_or(0, |table| {
            table.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }

    async fn renew_bounded(&self, current: &TokenData) -> Result<TokenData, RefreshFailure> {
        let start = Instant::now();
        let result =
            match tokio::time::timeout(self.timeout, self.renewer.renew(&current.refresh_token))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target: "gw.refresh",
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Token renewal timed out"
                    );
                    record_refresh("timeout", start.elapsed());
                    return Err(UpstreamFailure::transport(REFRESH_TIMEOUT_BODY));
                }
            };

        let status = match &result {
            Ok(_) => "success",
            Err(failure) if failure.is_rejection() => "rejected",
            Err(_) => "error",
        };
        record_refresh(status, start.elapsed());

        if let Ok(renewed) = &result {
            debug!(
                target: "gw.refresh",
                renewed = %hash_for_correlation(&renewed.access_token),
                expires_in = renewed.expires_in,
                "Token renewed"
            );
        }

        result
    }
}
