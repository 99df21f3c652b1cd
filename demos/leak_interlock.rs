//! Example: a leak on a simulated pipeline line
//!
//! Run with: cargo run --example leak_interlock
//!
//! This example demonstrates:
//! - Building a topology from configuration
//! - Driving the controller with tick/poll
//! - Flow-difference warning, alarm and countdown
//! - The line stop reaching the pump station as a command word

use std::collections::HashMap;
use std::time::{Duration, Instant};

use pipeline_interlock::utils::format_bytes;
use pipeline_interlock::{
    Controller, ControllerConfig, LineConfig, LineField, NodeConfig, SectionConfig, SharedDevice,
    SimulatedPlc,
};

const PUMP_RUN: u8 = 0x01;
const WORK_OK: u8 = 0x20;

fn main() -> pipeline_interlock::Result<()> {
    // =========================================================================
    // Two stations on one PLC: the pump station at 0, the terminal at 16
    // =========================================================================

    let plc = SimulatedPlc::new(32);
    plc.poke(0, &[0x00, PUMP_RUN | WORK_OK]);
    plc.poke(4, &100.0f32.to_be_bytes());
    plc.poke(16, &[0x00, WORK_OK]);
    plc.poke(20, &100.0f32.to_be_bytes());

    let mut devices: HashMap<String, SharedDevice> = HashMap::new();
    devices.insert("plc".into(), plc.shared());

    let config = ControllerConfig::new()
        .with_node(NodeConfig::new("station", "plc"))
        .with_node(NodeConfig::new("terminal", "plc").with_remote_start(16))
        .with_section(
            SectionConfig::new("segment-1", "main")
                .with_begin_nodes(["station"])
                .with_end_nodes(["terminal"])
                .with_pump_nodes(["station"])
                .with_flow_warning(10.0, 1000)
                .with_flow_alarm(20.0, 1500)
                .with_action_time(2000),
        )
        .with_line(LineConfig::new("main"));

    let mut controller = Controller::new(&config, &devices)?;
    let period = controller.tick_period();
    let mut now = Instant::now();

    // =========================================================================
    // Run, opening a leak after two ticks
    // =========================================================================

    for tick in 0..16 {
        if tick == 2 {
            println!("--- leak: terminal flow drops to 60 ---");
            plc.poke(20, &60.0f32.to_be_bytes());
        }

        controller.tick(now);
        for step in 1..=5 {
            controller.poll(now + Duration::from_millis(step * 100));
        }
        now += period;

        let topology = controller.topology();
        let section = topology.section("segment-1").expect("configured");
        let line = topology.line("main").expect("configured");
        let r = section.record();
        println!(
            "tick {:2}: diff={:5.1} warn={:5} alarm={:5} countdown={:5} line_stop={:5} pumps={}",
            tick,
            r.get_by_name("flow_diff")?.as_f64(),
            r.get_by_name("flow_warning_F")?.as_bool(),
            r.get_by_name("flow_alarm_F")?.as_bool(),
            r.get_by_name("action_countdown")?.as_i64().unwrap_or_default(),
            line.auto_stop(),
            line.get(LineField::PumpRun),
        );

        // the station PLC obeys a stop command and acknowledges it
        let command = plc.peek(12, 2);
        if command[1] & 0x01 != 0 {
            println!("station received command word [{}], stopping pumps", format_bytes(&command));
            plc.poke(0, &[0x00, WORK_OK]);
            plc.poke(4, &0.0f32.to_be_bytes());
            plc.poke(12, &[0x00, 0x00]);
        }
    }

    Ok(())
}
