use async_trait::async_trait;
use chrono::{Duration, Utc};
use innkeep_core::platform::{
    AdapterError, Credential, ExternalReservation, Platform, PlatformAdapter, PlatformConnection,
    RefreshedCredential,
};
use innkeep_core::reservation::StayDates;
use innkeep_shared::Masked;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Block(Uuid, Vec<StayDates>),
    Unblock(Uuid, Vec<StayDates>),
    List(Uuid),
    Refresh(Uuid),
}

/// Records every call. Failures can be queued per call or made permanent.
pub struct MockPlatformAdapter {
    platform: Platform,
    calls: Mutex<Vec<AdapterCall>>,
    queued_failures: Mutex<VecDeque<AdapterError>>,
    permanent_failure: Mutex<Option<AdapterError>>,
    external: Vec<ExternalReservation>,
}

impl MockPlatformAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            calls: Mutex::new(Vec::new()),
            queued_failures: Mutex::new(VecDeque::new()),
            permanent_failure: Mutex::new(None),
            external: Vec::new(),
        }
    }

    pub fn with_reservations(mut self, external: Vec<ExternalReservation>) -> Self {
        self.external = external;
        self
    }

    /// The next block/unblock/list call fails with `error`.
    pub fn fail_next(&self, error: AdapterError) {
        if let Ok(mut queue) = self.queued_failures.lock() {
            queue.push_back(error);
        }
    }

    /// Every block/unblock/list call fails until cleared with `None`.
    pub fn fail_always(&self, error: Option<AdapterError>) {
        if let Ok(mut permanent) = self.permanent_failure.lock() {
            *permanent = error;
        }
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: AdapterCall) -> Result<(), AdapterError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if let Some(err) = self.queued_failures.lock().ok().and_then(|mut q| q.pop_front()) {
            return Err(err);
        }
        match self.permanent_failure.lock().ok().and_then(|p| p.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformAdapter for MockPlatformAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn block(
        &self,
        connection: &PlatformConnection,
        _credential: &Credential,
        ranges: &[StayDates],
    ) -> Result<(), AdapterError> {
        self.record(AdapterCall::Block(connection.id, ranges.to_vec()))
    }

    async fn unblock(
        &self,
        connection: &PlatformConnection,
        _credential: &Credential,
        ranges: &[StayDates],
    ) -> Result<(), AdapterError> {
        self.record(AdapterCall::Unblock(connection.id, ranges.to_vec()))
    }

    async fn list_reservations(
        &self,
        connection: &PlatformConnection,
        _credential: &Credential,
    ) -> Result<Vec<ExternalReservation>, AdapterError> {
        self.record(AdapterCall::List(connection.id))?;
        Ok(self.external.clone())
    }

    async fn refresh_credential(
        &self,
        connection: &PlatformConnection,
        _refresh_token: &str,
    ) -> Result<RefreshedCredential, AdapterError> {
        let n = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| AdapterError::Transient("mock call log poisoned".to_string()))?;
            calls.push(AdapterCall::Refresh(connection.id));
            calls.iter().filter(|c| matches!(c, AdapterCall::Refresh(_))).count()
        };
        Ok(RefreshedCredential {
            credential: Credential {
                access_token: Masked::new(format!("refreshed-{}", n)),
                refresh_token: None,
            },
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }
}
