//! Application state

use std::sync::Arc;

use voice_session_config::Settings;
use voice_session_core::{
    AuditSink, FunctionExecutor, LanguageModel, SpeechToText, TextToSpeech, ToolDefinition,
};

use crate::auth::Authenticator;
use crate::session::SessionRegistry;

/// Vendors and collaborators shared by every session
pub struct SessionServices {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub functions: Arc<dyn FunctionExecutor>,
    /// Tools offered to the model; calls are routed to `functions`
    pub tools: Vec<ToolDefinition>,
    pub audit: Arc<dyn AuditSink>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionRegistry>,
    pub services: Arc<SessionServices>,
    pub auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(settings: Settings, services: SessionServices) -> Self {
        let sessions = Arc::new(SessionRegistry::new(&settings.session));
        let auth = Arc::new(Authenticator::new(&settings.server.auth));
        Self {
            settings: Arc::new(settings),
            sessions,
            services: Arc::new(services),
            auth,
        }
    }
}
