use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeline_interlock::{
    layouts, Controller, ControllerConfig, IoWindow, LineConfig, NodeConfig, Record,
    SectionConfig, SharedDevice, SimulatedPlc, Value,
};

fn bench_tags(c: &mut Criterion) {
    let mut record = Record::new(Arc::new(layouts::section().unwrap()), "s1");
    let flow = record.require("flow_diff").unwrap();
    let bypass = record.require("bypass").unwrap();

    c.bench_function("tag_get_f32", |b| b.iter(|| black_box(record.get(flow))));

    let mut on = false;
    c.bench_function("tag_set_bit", |b| {
        b.iter(|| {
            on = !on;
            black_box(record.set(bypass, Value::Bit(on)).unwrap())
        })
    });
}

fn bench_groups(c: &mut Criterion) {
    let plc = SimulatedPlc::new(64);
    let mut record = Record::new(Arc::new(layouts::node().unwrap()), "n1");
    record
        .set_io(plc.shared(), IoWindow::new(0, 0, layouts::NODE_WINDOW))
        .unwrap();
    let inputs = record.create_group(layouts::NODE_INPUTS).unwrap();

    c.bench_function("group_read_node_inputs", |b| {
        b.iter(|| inputs.read(black_box(&mut record)).unwrap())
    });
    c.bench_function("group_write_node_inputs", |b| {
        b.iter(|| inputs.write(black_box(&mut record)).unwrap())
    });
}

fn bench_controller(c: &mut Criterion) {
    let plc = SimulatedPlc::new(1024);
    let mut devices: HashMap<String, SharedDevice> = HashMap::new();
    devices.insert("plc".into(), plc.shared());

    let mut config = ControllerConfig::new().with_line(LineConfig::new("main"));
    for i in 0..32 {
        config = config.with_node(NodeConfig::new(format!("n{i}"), "plc").with_remote_start(i * 16));
    }
    for i in 0..16 {
        let (begin, end) = (format!("n{}", i * 2), format!("n{}", i * 2 + 1));
        config = config.with_section(
            SectionConfig::new(format!("s{i}"), "main")
                .with_begin_nodes([begin.as_str()])
                .with_end_nodes([end.as_str()])
                .with_pump_nodes([begin.as_str()]),
        );
    }
    let mut controller = Controller::new(&config, &devices).unwrap();

    let mut now = Instant::now();
    c.bench_function("controller_tick_32_nodes", |b| {
        b.iter(|| {
            now += Duration::from_millis(500);
            controller.tick(now);
            controller.poll(now);
        })
    });
}

criterion_group!(benches, bench_tags, bench_groups, bench_controller);
criterion_main!(benches);
