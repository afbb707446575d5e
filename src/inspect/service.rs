//! Registry of live sessions and their adapters
//!
//! Sessions are registered with their channel when they start. The adapter
//! for a session is built on first use and dropped when the session ends.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dap::Capabilities;

use super::adapter::{RuntimeAdapter, SessionEvent};
use super::channel::{DebugChannel, SessionInfo};
use super::error::{ErrorCode, InspectError, InspectResult};
use super::factory::AdapterFactory;

struct Registration {
    info: SessionInfo,
    channel: Arc<dyn DebugChannel>,
    reported: Option<Capabilities>,
    /// Thread from a stop that arrived before the adapter was built
    stopped_thread: Option<i64>,
}

#[derive(Default)]
struct Sessions {
    registered: HashMap<String, Registration>,
    adapters: HashMap<String, Arc<RuntimeAdapter>>,
    active: Option<String>,
}

pub struct InspectionService {
    factory: AdapterFactory,
    sessions: Mutex<Sessions>,
}

impl InspectionService {
    pub fn new(factory: AdapterFactory) -> Self {
        Self {
            factory,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn factory(&self) -> &AdapterFactory {
        &self.factory
    }

    /// Make a session known; the first one registered becomes active
    pub fn register_session(
        &self,
        info: SessionInfo,
        channel: Arc<dyn DebugChannel>,
        reported: Option<Capabilities>,
    ) {
        let mut sessions = self.sessions.lock();
        let id = info.id.clone();
        if let Some(stale) = sessions.adapters.remove(&id) {
            stale.dispose();
        }
        sessions.registered.insert(
            id.clone(),
            Registration {
                info,
                channel,
                reported,
                stopped_thread: None,
            },
        );
        sessions.active.get_or_insert(id);
    }

    pub fn set_active(&self, session_id: &str) -> InspectResult<()> {
        let mut sessions = self.sessions.lock();
        if !sessions.registered.contains_key(session_id) {
            return Err(no_session(session_id));
        }
        sessions.active = Some(session_id.to_string());
        Ok(())
    }

    pub fn active_session(&self) -> Option<String> {
        self.sessions.lock().active.clone()
    }

    /// The adapter for `session_id`, created on first access
    pub fn adapter(&self, session_id: &str) -> InspectResult<Arc<RuntimeAdapter>> {
        let mut sessions = self.sessions.lock();
        if let Some(adapter) = sessions.adapters.get(session_id) {
            return Ok(Arc::clone(adapter));
        }

        let registration = sessions
            .registered
            .get(session_id)
            .ok_or_else(|| no_session(session_id))?;
        let adapter = Arc::new(self.factory.create(
            registration.info.clone(),
            Arc::clone(&registration.channel),
            registration.reported.as_ref(),
        )?);
        if let Some(thread_id) = registration.stopped_thread {
            adapter.handle_event(SessionEvent::Stopped {
                thread_id: Some(thread_id),
            });
        }
        sessions
            .adapters
            .insert(session_id.to_string(), Arc::clone(&adapter));
        Ok(adapter)
    }

    /// The adapter for the active session
    pub fn active_adapter(&self) -> InspectResult<Arc<RuntimeAdapter>> {
        let active = self
            .active_session()
            .ok_or_else(|| InspectError::new(ErrorCode::NoSession))?;
        self.adapter(&active)
    }

    /// Forward a lifecycle signal; termination also forgets the session
    pub fn handle_event(&self, session_id: &str, event: SessionEvent) {
        if event == SessionEvent::Terminated {
            self.dispose(session_id);
            return;
        }
        let adapter = {
            let mut sessions = self.sessions.lock();
            let adapter = sessions.adapters.get(session_id).cloned();
            if adapter.is_none() {
                if let Some(registration) = sessions.registered.get_mut(session_id) {
                    registration.stopped_thread = match event {
                        SessionEvent::Stopped { thread_id } => thread_id,
                        _ => None,
                    };
                }
            }
            adapter
        };
        if let Some(adapter) = adapter {
            adapter.handle_event(event);
        }
    }

    /// Dispose the session's adapter and forget the session
    pub fn dispose(&self, session_id: &str) {
        let adapter = {
            let mut sessions = self.sessions.lock();
            sessions.registered.remove(session_id);
            if sessions.active.as_deref() == Some(session_id) {
                sessions.active = None;
            }
            sessions.adapters.remove(session_id)
        };
        if let Some(adapter) = adapter {
            adapter.dispose();
        }
        tracing::debug!(session = %session_id, "Session removed from inspection service");
    }

    pub fn dispose_all(&self) {
        let adapters: Vec<_> = {
            let mut sessions = self.sessions.lock();
            sessions.registered.clear();
            sessions.active = None;
            sessions.adapters.drain().map(|(_, a)| a).collect()
        };
        for adapter in adapters {
            adapter.dispose();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().registered.len()
    }

    pub fn supported_types(&self) -> Vec<String> {
        self.factory.supported_types()
    }
}

fn no_session(session_id: &str) -> InspectError {
    InspectError::new(ErrorCode::NoSession).detail(format!("unknown session '{session_id}'"))
}
