//! The loop controller: Idle → Observing → AwaitingModel → Acting → … →
//! Terminated.
//!
//! Every step is one full round trip: perform (execute pending action +
//! fresh observation) → prompt the model with the complete history → parse
//! `Thought:`/`Action:` → stash the action for the next step. The loop ends
//! when the parsed action begins with `ANSWER`, or when the caller stops
//! resuming.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::conversation::Conversation;
use super::prompts;
use super::{AgentError, AgentResult, StepRecord};
use crate::llm::{ModelClient, collect_stream};
use crate::operator::{Operator, OperatorError, PageObservation, PerformRequest, PerformResponse};

pub struct AgentLoop {
    operator: Arc<Operator>,
    model: Arc<dyn ModelClient>,
    /// Ask for deltas and reassemble instead of one JSON body. The loop
    /// always needs the full text before parsing either way.
    stream: bool,
    conversation: Option<Conversation>,
    steps: Vec<StepRecord>,
    pending_action: Option<String>,
    last_url: Option<String>,
    answer: Option<String>,
}

impl AgentLoop {
    pub fn new(operator: Arc<Operator>, model: Arc<dyn ModelClient>, stream: bool) -> Self {
        Self {
            operator,
            model,
            stream,
            conversation: None,
            steps: Vec::new(),
            pending_action: None,
            last_url: None,
            answer: None,
        }
    }

    /// Begin a task: observe the start URL, send the fixed system prompt plus
    /// the first observation, and record the model's first step.
    ///
    /// Any previous task's state is discarded — a new task means a new
    /// conversation.
    pub async fn init_task(&mut self, task: &str, start_url: &str) -> AgentResult<StepRecord> {
        self.conversation = None;
        self.steps.clear();
        self.pending_action = None;
        self.answer = None;

        let observation = self.perform(PerformRequest::observe(start_url)).await?;
        self.last_url = Some(observation.current_url.clone());

        let text =
            prompts::initial_observation(task, &observation.current_url, &observation.markers);
        let mut conversation = Conversation::new(prompts::SYSTEM_PROMPT);

        let reply = self
            .exchange(&mut conversation, text, &observation.screenshot)
            .await?;
        self.conversation = Some(conversation);

        Ok(self.record_reply(&reply))
    }

    /// Run one more step: execute the pending action, re-observe, and ask the
    /// model again with the full history.
    pub async fn resume(&mut self) -> AgentResult<StepRecord> {
        if self.conversation.is_none() {
            return Err(AgentError::InvalidState(
                "resume called before init_task".into(),
            ));
        }
        if self.answer.is_some() {
            return Err(AgentError::InvalidState("task already answered".into()));
        }

        let actions: Vec<String> = self.pending_action.take().into_iter().collect();
        let request = PerformRequest::actions(self.last_url.clone(), actions);

        let observation = match self.perform(request).await {
            Ok(observation) => observation,
            // Resolution failures mean the action referenced a marker the
            // DOM no longer backs. Recover by observing fresh state.
            Err(AgentError::Operator(OperatorError::Action(e))) => {
                warn!("Action failed ({}); re-observing", e);
                self.perform(PerformRequest::actions(self.last_url.clone(), Vec::new()))
                    .await?
            }
            Err(e) => return Err(e),
        };
        self.last_url = Some(observation.current_url.clone());

        let text = prompts::resume_observation(&observation.markers);
        let Some(mut conversation) = self.conversation.take() else {
            return Err(AgentError::InvalidState(
                "conversation disappeared mid-resume".into(),
            ));
        };
        let result = self
            .exchange(&mut conversation, text, &observation.screenshot)
            .await;
        self.conversation = Some(conversation);
        let reply = result?;

        Ok(self.record_reply(&reply))
    }

    /// Drive the loop until the model answers or `max_steps` is reached.
    ///
    /// The loop itself has no ceiling; this is the caller-side safeguard
    /// bounding cost and runaway behavior.
    pub async fn run(
        &mut self,
        task: &str,
        start_url: &str,
        max_steps: usize,
    ) -> AgentResult<Option<String>> {
        self.init_task(task, start_url).await?;

        for _ in 1..max_steps {
            if self.answer.is_some() {
                break;
            }
            self.resume().await?;
        }

        if let Some(answer) = &self.answer {
            info!("Task answered after {} steps", self.steps.len());
            Ok(Some(answer.clone()))
        } else {
            info!("Step ceiling reached after {} steps", self.steps.len());
            Ok(None)
        }
    }

    /// Clear conversation, step log and session.
    pub async fn reset(&mut self) {
        self.operator.reset().await;
        self.conversation = None;
        self.steps.clear();
        self.pending_action = None;
        self.last_url = None;
        self.answer = None;
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn is_done(&self) -> bool {
        self.answer.is_some()
    }

    /// Final answer text once the model has issued `ANSWER`.
    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub fn operator(&self) -> &Arc<Operator> {
        &self.operator
    }

    async fn perform(&self, request: PerformRequest) -> AgentResult<PageObservation> {
        match self.operator.perform(request).await? {
            PerformResponse::Page(observation) => Ok(observation),
            PerformResponse::Reset(_) => Err(AgentError::InvalidState(
                "observation request answered with a reset ack".into(),
            )),
        }
    }

    /// Send the observation and return the model's reply.
    ///
    /// The observation joins the history only after the model call succeeds:
    /// a failed or timed-out call leaves conversation and session untouched,
    /// so a retry re-observes fresh state instead of replaying a stale step.
    async fn exchange(
        &self,
        conversation: &mut Conversation,
        text: String,
        screenshot: &str,
    ) -> AgentResult<String> {
        let mut attempt = conversation.clone();
        attempt.push_observation(text, Some(screenshot));

        let reply = if self.stream {
            let rx = self
                .model
                .complete_stream(attempt.messages())
                .await
                .map_err(|e| AgentError::Model(e.to_string()))?;
            collect_stream(rx)
                .await
                .map_err(|e| AgentError::Model(e.to_string()))?
        } else {
            self.model
                .complete(attempt.messages())
                .await
                .map_err(|e| AgentError::Model(e.to_string()))?
        };

        attempt.push_assistant(&reply);
        *conversation = attempt;
        Ok(reply)
    }

    /// Parse the reply, log the step, and stage the action for the next
    /// resume. An empty action (model-contract failure) stages nothing — the
    /// next step is a plain re-observation.
    fn record_reply(&mut self, reply: &str) -> StepRecord {
        let (thought, action) = prompts::split_reply(reply);

        let record = StepRecord {
            thought,
            action: action.clone(),
            at: Utc::now(),
        };
        self.steps.push(record.clone());

        if action.is_empty() {
            // Model-contract failure: no Action token. Next step just
            // re-observes.
        } else if let Ok(crate::action::Action::Answer(text)) = crate::action::parse(&action) {
            self.answer = Some(text);
            self.pending_action = None;
        } else {
            // Staged verbatim; the interpreter is the one that validates and
            // reports grammar or index problems.
            self.pending_action = Some(action);
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use crate::llm::{ChatMessage, ModelError};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct CannedModel;

    #[async_trait]
    impl ModelClient for CannedModel {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
            Ok("Thought: ok Action: Click [0]".into())
        }

        async fn complete_stream(
            &self,
            _messages: &[ChatMessage],
        ) -> Result<mpsc::Receiver<Result<String, ModelError>>, ModelError> {
            let (tx, rx) = mpsc::channel(4);
            tx.send(Ok("Thought: ok Action: Click [0]".into()))
                .await
                .ok();
            Ok(rx)
        }
    }

    fn test_loop() -> AgentLoop {
        AgentLoop::new(
            Arc::new(Operator::new(&Config::default())),
            Arc::new(CannedModel),
            false,
        )
    }

    #[test]
    fn recorded_click_becomes_the_pending_action() {
        let mut agent = test_loop();
        let record =
            agent.record_reply("Thought: search box is [4].\nAction: Type [4]; rust book");
        assert_eq!(record.action, "Type [4]; rust book");
        assert_eq!(agent.pending_action.as_deref(), Some("Type [4]; rust book"));
        assert!(!agent.is_done());
        assert_eq!(agent.steps().len(), 1);
    }

    #[test]
    fn answer_terminates_the_loop_and_stages_nothing() {
        let mut agent = test_loop();
        agent.record_reply("Thought: found it. Action: ANSWER; February 5, 1985");
        assert!(agent.is_done());
        assert_eq!(agent.answer(), Some("February 5, 1985"));
        assert!(agent.pending_action.is_none());
    }

    #[test]
    fn reply_without_action_token_is_a_noop_step() {
        let mut agent = test_loop();
        let record = agent.record_reply("I could not decide");
        assert_eq!(record.action, "");
        assert!(agent.pending_action.is_none());
        assert_eq!(agent.steps().len(), 1);
    }

    #[tokio::test]
    async fn resume_before_init_is_an_invalid_state() {
        let mut agent = test_loop();
        assert!(matches!(
            agent.resume().await,
            Err(AgentError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn reset_clears_the_step_log() {
        let mut agent = test_loop();
        agent.record_reply("Thought: x Action: Click [1]");
        agent.reset().await;
        assert!(agent.steps().is_empty());
        assert!(agent.pending_action.is_none());
        assert!(!agent.is_done());
    }
}
