use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use ape_agent::{AgentConfig, Observation};
use ape_core::{Device, DeviceError, EventSource, Session, SessionLimits, StepOutcome, StopReason};
use ape_model::{ActionType, GuiNode, GuiSnapshot, ResolvedAction, Widget};
use ape_server::{EventServer, IdleOutcome, ServerConfig, TargetMethodDescriptor, TraceClient};

type Screens = HashMap<&'static str, Vec<(&'static str, &'static str)>>;

fn shop() -> Screens {
    let mut screens = Screens::new();
    screens.insert("Main", vec![("cart", "Cart"), ("about", "About")]);
    screens.insert("Cart", vec![("checkout", "Checkout")]);
    screens.insert("Checkout", vec![]);
    screens.insert("About", vec![]);
    screens
}

/// Navigates `screens`; returns whether the dispatched action was the target.
struct Navigator {
    screens: Screens,
    current: &'static str,
    stack: Vec<&'static str>,
    target: (&'static str, &'static str),
    restarts: u32,
}

impl Navigator {
    fn new(target: (&'static str, &'static str)) -> Self {
        Self {
            screens: shop(),
            current: "Main",
            stack: Vec::new(),
            target,
            restarts: 0,
        }
    }

    fn observation(&self) -> Observation {
        let nodes = self.screens[self.current]
            .iter()
            .map(|(w, _)| GuiNode {
                widget: Widget::new(*w, &[ActionType::Click]),
                bounds: Default::default(),
            })
            .collect();
        Observation::new(GuiSnapshot::new(self.current, nodes))
    }

    fn perform(&mut self, action: &ResolvedAction) -> bool {
        let Some(widget) = action.target.as_deref() else {
            if let Some(previous) = self.stack.pop() {
                self.current = previous;
            }
            return false;
        };
        let from = self.current;
        if let Some(&(_, next)) = self.screens[from].iter().find(|(w, _)| *w == widget) {
            if next != from {
                self.stack.push(from);
                self.current = next;
            }
        }
        (from, widget) == self.target
    }

    fn relaunch(&mut self) {
        self.current = "Main";
        self.stack.clear();
        self.restarts += 1;
    }
}

/// In-memory trace events driven by a shared clock.
#[derive(Default)]
struct Clock {
    now: i64,
    last_target: i64,
    crash_on_wait: u32,
}

struct FakeDevice {
    nav: Navigator,
    clock: Rc<RefCell<Clock>>,
}

impl Device for FakeDevice {
    fn observe(&mut self) -> Result<Observation, DeviceError> {
        Ok(self.nav.observation())
    }

    fn dispatch(&mut self, action: &ResolvedAction) -> Result<(), DeviceError> {
        let mut clock = self.clock.borrow_mut();
        clock.now += 1;
        if self.nav.perform(action) {
            clock.last_target = clock.now;
        }
        Ok(())
    }

    fn restart(&mut self) -> Result<(), DeviceError> {
        self.nav.relaunch();
        Ok(())
    }
}

struct FakeEvents {
    clock: Rc<RefCell<Clock>>,
}

impl EventSource for FakeEvents {
    fn met_target_methods(&self, since: i64) -> bool {
        self.clock.borrow().last_target > since
    }

    fn wait_for_idle(&self, _since: i64, _timeout: Duration) -> IdleOutcome {
        let mut clock = self.clock.borrow_mut();
        if clock.crash_on_wait > 0 {
            clock.crash_on_wait -= 1;
            return IdleOutcome::Crashed;
        }
        clock.now += 1;
        IdleOutcome::Idle(clock.now)
    }
}

fn session(
    config: AgentConfig,
    max_steps: u64,
    target: (&'static str, &'static str),
) -> (Session<FakeDevice, FakeEvents>, Rc<RefCell<Clock>>) {
    let clock = Rc::new(RefCell::new(Clock::default()));
    let device = FakeDevice {
        nav: Navigator::new(target),
        clock: Rc::clone(&clock),
    };
    let events = FakeEvents {
        clock: Rc::clone(&clock),
    };
    let limits = SessionLimits {
        max_steps,
        ..Default::default()
    };
    (Session::new(config, limits, device, events), clock)
}

#[test]
fn test_run_stops_at_step_limit() {
    let (mut session, _) = session(AgentConfig::default(), 25, ("Cart", "checkout"));
    let report = session.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::StepLimit);
    assert_eq!(report.steps, 25);
    assert_eq!(report.agent.decisions, 25);
    assert!(report.agent.states >= 3);
}

#[test]
fn test_hits_reach_the_agent() {
    let (mut session, _) = session(AgentConfig::default(), 40, ("Main", "cart"));
    let report = session.run().unwrap();
    assert!(report.agent.target_hits > 0);
    assert!(!session.agent().graph().met_target_states().is_empty());
}

#[test]
fn test_trigger_enables_target_mode() {
    let config = AgentConfig {
        target_trigger_steps: 10,
        ..AgentConfig::default()
    };
    let (mut session, _) = session(config, 30, ("Main", "cart"));
    session.run().unwrap();
    assert!(session.agent().is_target_mode());
}

#[test]
fn test_crash_restarts_device_and_episode() {
    let (mut session, clock) = session(AgentConfig::default(), 10, ("Cart", "checkout"));
    clock.borrow_mut().crash_on_wait = 1;

    assert_eq!(session.step().unwrap(), StepOutcome::Restarted);
    assert_eq!(session.restarts(), 1);
    assert_eq!(session.device().nav.restarts, 1);

    assert_eq!(session.step().unwrap(), StepOutcome::Continued);
    // Both observations of Main opened an episode, so no transition exists.
    assert_eq!(session.agent().graph().transition_count(), 0);
}

#[test]
fn test_report_serializes() {
    let (mut session, _) = session(AgentConfig::default(), 5, ("Cart", "checkout"));
    let report = session.run().unwrap();
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"stop_reason\":\"step_limit\""));
}

/// A device whose instrumented app reports through the real event server.
struct TracedDevice {
    nav: Navigator,
    client: TraceClient,
    now: i64,
}

impl Device for TracedDevice {
    fn observe(&mut self) -> Result<Observation, DeviceError> {
        Ok(self.nav.observation())
    }

    fn dispatch(&mut self, action: &ResolvedAction) -> Result<(), DeviceError> {
        let hit = self.nav.perform(action);
        self.now += 10;
        if hit {
            self.client
                .entered(0, self.now)
                .map_err(|e| DeviceError::Other(e.to_string()))?;
        }
        self.now += 10;
        self.client
            .idle(self.now)
            .map_err(|e| DeviceError::Other(e.to_string()))
    }

    fn restart(&mut self) -> Result<(), DeviceError> {
        self.nav.relaunch();
        Ok(())
    }
}

#[test]
fn test_session_over_event_server() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        socket_path: dir.path().join("ape.sock"),
        accept_poll_millis: 10,
        ..Default::default()
    };
    let methods = vec![TargetMethodDescriptor::new("com.example.Main", "openCart", "()V", 1).unwrap()];
    let server = EventServer::start_with_methods(config, methods).unwrap();
    let client = TraceClient::connect(server.socket_path(), 1, "/tmp/trace").unwrap();

    let device = TracedDevice {
        nav: Navigator::new(("Main", "cart")),
        client,
        now: 0,
    };
    let limits = SessionLimits {
        max_steps: 20,
        idle_timeout_millis: 2_000,
        ..Default::default()
    };
    let mut session = Session::new(AgentConfig::default(), limits, device, server.handle());
    let report = session.run().unwrap();

    assert_eq!(report.stop_reason, StopReason::StepLimit);
    assert_eq!(report.restarts, 0);
    assert!(report.agent.target_hits > 0);
    assert_eq!(server.handle().last_target_method().unwrap().method(), "openCart");
}
