use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) insert_candidate_handlers: Vec<HandlerPtr<InsertCandidateEvent>>,
    pub(crate) approve_candidate_handlers: Vec<HandlerPtr<ApproveCandidateEvent>>,
    pub(crate) state_transition_handlers: Vec<HandlerPtr<StateTransitionEvent>>,
    pub(crate) synced_handlers: Vec<HandlerPtr<SyncedEvent>>,
    pub(crate) pull_anchor_handlers: Vec<HandlerPtr<PullAnchorEvent>>,
    pub(crate) pull_confirmed_output_handlers: Vec<HandlerPtr<PullConfirmedOutputEvent>>,
    pub(crate) request_block_handlers: Vec<HandlerPtr<RequestBlockEvent>>,
    pub(crate) observe_anchor_handlers: Vec<HandlerPtr<ObserveAnchorEvent>>,
    pub(crate) receive_peer_block_handlers: Vec<HandlerPtr<ReceivePeerBlockEvent>>,
    pub(crate) discard_peer_block_handlers: Vec<HandlerPtr<DiscardPeerBlockEvent>>,
    pub(crate) start_execution_handlers: Vec<HandlerPtr<StartExecutionEvent>>,
    pub(crate) finish_execution_handlers: Vec<HandlerPtr<FinishExecutionEvent>>,
    pub(crate) fail_execution_handlers: Vec<HandlerPtr<FailExecutionEvent>>,
    pub(crate) hash_conflict_handlers: Vec<HandlerPtr<HashConflictEvent>>,
    pub(crate) reject_block_handlers: Vec<HandlerPtr<RejectBlockEvent>>,
}

impl EventHandlers {
    /// Collect the user-registered handlers into handler lists, prepending the default logging
    /// handler to each list if `log_events` is enabled.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        insert_candidate_handler: Option<HandlerPtr<InsertCandidateEvent>>,
        approve_candidate_handler: Option<HandlerPtr<ApproveCandidateEvent>>,
        state_transition_handler: Option<HandlerPtr<StateTransitionEvent>>,
        synced_handler: Option<HandlerPtr<SyncedEvent>>,
        pull_anchor_handler: Option<HandlerPtr<PullAnchorEvent>>,
        pull_confirmed_output_handler: Option<HandlerPtr<PullConfirmedOutputEvent>>,
        request_block_handler: Option<HandlerPtr<RequestBlockEvent>>,
        observe_anchor_handler: Option<HandlerPtr<ObserveAnchorEvent>>,
        receive_peer_block_handler: Option<HandlerPtr<ReceivePeerBlockEvent>>,
        discard_peer_block_handler: Option<HandlerPtr<DiscardPeerBlockEvent>>,
        start_execution_handler: Option<HandlerPtr<StartExecutionEvent>>,
        finish_execution_handler: Option<HandlerPtr<FinishExecutionEvent>>,
        fail_execution_handler: Option<HandlerPtr<FailExecutionEvent>>,
        hash_conflict_handler: Option<HandlerPtr<HashConflictEvent>>,
        reject_block_handler: Option<HandlerPtr<RejectBlockEvent>>,
    ) -> EventHandlers {
        fn handler_list<T: Logger>(
            log_events: bool,
            registered: Option<HandlerPtr<T>>,
        ) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            handlers.extend(registered);
            handlers
        }

        EventHandlers {
            insert_candidate_handlers: handler_list(log_events, insert_candidate_handler),
            approve_candidate_handlers: handler_list(log_events, approve_candidate_handler),
            state_transition_handlers: handler_list(log_events, state_transition_handler),
            synced_handlers: handler_list(log_events, synced_handler),
            pull_anchor_handlers: handler_list(log_events, pull_anchor_handler),
            pull_confirmed_output_handlers: handler_list(log_events, pull_confirmed_output_handler),
            request_block_handlers: handler_list(log_events, request_block_handler),
            observe_anchor_handlers: handler_list(log_events, observe_anchor_handler),
            receive_peer_block_handlers: handler_list(log_events, receive_peer_block_handler),
            discard_peer_block_handlers: handler_list(log_events, discard_peer_block_handler),
            start_execution_handlers: handler_list(log_events, start_execution_handler),
            finish_execution_handlers: handler_list(log_events, finish_execution_handler),
            fail_execution_handlers: handler_list(log_events, fail_execution_handler),
            hash_conflict_handlers: handler_list(log_events, hash_conflict_handler),
            reject_block_handlers: handler_list(log_events, reject_block_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_candidate_handlers.is_empty()
            && self.approve_candidate_handlers.is_empty()
            && self.state_transition_handlers.is_empty()
            && self.synced_handlers.is_empty()
            && self.pull_anchor_handlers.is_empty()
            && self.pull_confirmed_output_handlers.is_empty()
            && self.request_block_handlers.is_empty()
            && self.observe_anchor_handlers.is_empty()
            && self.receive_peer_block_handlers.is_empty()
            && self.discard_peer_block_handlers.is_empty()
            && self.start_execution_handlers.is_empty()
            && self.finish_execution_handlers.is_empty()
            && self.fail_execution_handlers.is_empty()
            && self.hash_conflict_handlers.is_empty()
            && self.reject_block_handlers.is_empty()
    }

    pub fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertCandidate(insert_candidate_event) => self
                .insert_candidate_handlers
                .iter()
                .for_each(|handler| handler(&insert_candidate_event)),

            Event::ApproveCandidate(approve_candidate_event) => self
                .approve_candidate_handlers
                .iter()
                .for_each(|handler| handler(&approve_candidate_event)),

            Event::StateTransition(state_transition_event) => self
                .state_transition_handlers
                .iter()
                .for_each(|handler| handler(&state_transition_event)),

            Event::Synced(synced_event) => self
                .synced_handlers
                .iter()
                .for_each(|handler| handler(&synced_event)),

            Event::PullAnchor(pull_anchor_event) => self
                .pull_anchor_handlers
                .iter()
                .for_each(|handler| handler(&pull_anchor_event)),

            Event::PullConfirmedOutput(pull_confirmed_output_event) => self
                .pull_confirmed_output_handlers
                .iter()
                .for_each(|handler| handler(&pull_confirmed_output_event)),

            Event::RequestBlock(request_block_event) => self
                .request_block_handlers
                .iter()
                .for_each(|handler| handler(&request_block_event)),

            Event::ObserveAnchor(observe_anchor_event) => self
                .observe_anchor_handlers
                .iter()
                .for_each(|handler| handler(&observe_anchor_event)),

            Event::ReceivePeerBlock(receive_peer_block_event) => self
                .receive_peer_block_handlers
                .iter()
                .for_each(|handler| handler(&receive_peer_block_event)),

            Event::DiscardPeerBlock(discard_peer_block_event) => self
                .discard_peer_block_handlers
                .iter()
                .for_each(|handler| handler(&discard_peer_block_event)),

            Event::StartExecution(start_execution_event) => self
                .start_execution_handlers
                .iter()
                .for_each(|handler| handler(&start_execution_event)),

            Event::FinishExecution(finish_execution_event) => self
                .finish_execution_handlers
                .iter()
                .for_each(|handler| handler(&finish_execution_event)),

            Event::FailExecution(fail_execution_event) => self
                .fail_execution_handlers
                .iter()
                .for_each(|handler| handler(&fail_execution_event)),

            Event::HashConflict(hash_conflict_event) => self
                .hash_conflict_handlers
                .iter()
                .for_each(|handler| handler(&hash_conflict_event)),

            Event::RejectBlock(reject_block_event) => self
                .reject_block_handlers
                .iter()
                .for_each(|handler| handler(&reject_block_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The state manager (the event publisher) shuts down after the event bus, so this only
            // happens if the manager thread panicked.
            Err(TryRecvError::Disconnected) => return,
        }
    })
}
