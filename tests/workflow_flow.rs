use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use swarmflow::agent::{AgentDescriptor, AgentStatus, AgentType};
use swarmflow::decision::{DecisionType, PendingApproval};
use swarmflow::orchestrator::{lock, AgentEvent, AgentRef, EventLoop, Orchestrator};
use swarmflow::timeout::Timed;
use swarmflow::workflow::{PhaseKind, PhaseSpec, PhaseStatus, WorkflowStatus};

fn completed(thread: &str, output: &str) -> AgentEvent {
    AgentEvent::Completed {
        agent: AgentRef::Thread(thread.to_string()),
        output: Some(output.to_string()),
    }
}

fn completed_id(id: &str) -> AgentEvent {
    AgentEvent::Completed {
        agent: AgentRef::Id(id.to_string()),
        output: Some("second try".to_string()),
    }
}

fn phases() -> Vec<PhaseSpec> {
    vec![
        PhaseSpec::new(PhaseKind::Exploration, "Explore")
            .agent(AgentDescriptor::new(AgentType::Explorer, "map the auth module").with_thread("t-explore")),
        PhaseSpec::new(PhaseKind::Implementation, "Implement")
            .gated()
            .agent(
                AgentDescriptor::new(AgentType::Coder, "add token expiry")
                    .with_id("coder")
                    .with_thread("t-coder"),
            )
            .agent(
                AgentDescriptor::new(AgentType::Tester, "test token expiry")
                    .with_thread("t-tester")
                    .depends_on("coder"),
            ),
    ]
}

/// Feed events through a fresh loop and wait for it to drain.
fn drive(shared: &swarmflow::orchestrator::SharedOrchestrator, events: Vec<AgentEvent>) -> usize {
    let (tx, rx) = mpsc::channel();
    let event_loop = EventLoop::spawn(Arc::clone(shared), rx);
    for event in events {
        tx.send(event).unwrap();
    }
    drop(tx);
    match event_loop.join_timeout(Duration::from_secs(10)) {
        Timed::Completed(applied) => applied,
        Timed::TimedOut => panic!("event loop did not finish"),
    }
}

#[test]
fn test_two_phase_workflow_with_rejection_and_retry() {
    let shared = Orchestrator::new(Duration::from_secs(600)).into_shared();
    lock(&shared)
        .start_workflow("token expiry", "add expiry to tokens", phases(), false)
        .unwrap();

    let applied = drive(
        &shared,
        vec![
            completed("t-explore", "auth lives in src/auth"),
            completed("t-coder", "patch ready"),
            completed("t-tester", "tests green"),
        ],
    );
    assert_eq!(applied, 3);

    let approvals: HashMap<String, Vec<PendingApproval>> = HashMap::new();
    let phase_id = {
        let orch = lock(&shared);
        let workflow = orch.workflow().unwrap();
        assert_eq!(workflow.current_phase_index, 1);
        assert_eq!(workflow.phases[0].status, PhaseStatus::Completed);
        let phase = &workflow.phases[1];
        assert_eq!(phase.status, PhaseStatus::AwaitingApproval);
        let output = phase.output.as_deref().unwrap();
        assert!(output.contains("patch ready"));
        assert!(output.contains("tests green"));

        let queue = orch.decisions(&approvals);
        let primary = queue.primary_decision().unwrap();
        assert_eq!(primary.decision_type, DecisionType::PhaseApproval);
        assert_eq!(primary.id, format!("phase:{}", phase.id));
        phase.id.clone()
    };

    let (coder, tester) = {
        let mut orch = lock(&shared);
        orch.reject_phase(&phase_id, Some("needs negative tests")).unwrap();
        assert_eq!(orch.workflow().unwrap().current_phase_index, 1);
        orch.retry_phase(&phase_id).unwrap();

        let phase = orch.workflow().unwrap().current_phase().unwrap();
        assert_eq!(phase.status, PhaseStatus::Running);
        assert_eq!(phase.previous_agent_ids.len(), 2);
        let agents: Vec<_> = phase
            .agent_ids
            .iter()
            .map(|id| orch.registry().get(id).unwrap().clone())
            .collect();
        assert!(agents
            .iter()
            .all(|a| a.task.contains("Previous attempt was rejected: needs negative tests")));
        let coder = agents.iter().find(|a| a.agent_type == AgentType::Coder).unwrap();
        let tester = agents.iter().find(|a| a.agent_type == AgentType::Tester).unwrap();
        assert_eq!(tester.dependencies, vec![coder.id.clone()]);
        assert_eq!(tester.status, AgentStatus::Pending);
        (coder.id.clone(), tester.id.clone())
    };

    assert_eq!(drive(&shared, vec![completed_id(&coder), completed_id(&tester)]), 2);

    let mut orch = lock(&shared);
    assert_eq!(
        orch.workflow().unwrap().phases[1].status,
        PhaseStatus::AwaitingApproval
    );
    orch.approve_phase(&phase_id).unwrap();

    let workflow = orch.workflow().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.completed_phases(), 2);
    assert!(orch.decisions(&approvals).is_empty());
}

#[test]
fn test_events_for_unknown_agents_do_not_stop_the_loop() {
    let shared = Orchestrator::new(Duration::from_secs(600)).into_shared();
    lock(&shared)
        .start_workflow("explore", "", phases()[..1].to_vec(), false)
        .unwrap();

    let applied = drive(
        &shared,
        vec![
            completed("t-nobody", "lost"),
            completed("t-explore", "found it"),
        ],
    );

    assert_eq!(applied, 1);
    let orch = lock(&shared);
    assert_eq!(orch.workflow().unwrap().status, WorkflowStatus::Completed);
}
