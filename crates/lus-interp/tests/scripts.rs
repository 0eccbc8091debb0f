// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Script-level integration: workers, pledges and message passing
//! driven from real Lus source, through the same engine the CLI
//! uses.

use lus_interp::Interpreter;

fn fixture(name: &str) -> String {
    format!("tests/fixtures/{name}")
}

fn run_capture(source: &str) -> String {
    let (mut interp, out) = Interpreter::with_captured_output();
    interp
        .run_source(source, "test")
        .unwrap_or_else(|e| panic!("script failed: {e}"));
    let s = out.borrow().clone();
    s
}

#[test]
fn worker_sum_scenario() {
    let source = format!(
        "pledge('fs:read')\n\
         local h = worker.create('{}', 2, 3)\n\
         local x = worker.receive(h)\n\
         print(x)\n\
         while worker.status(h) == 'running' do os.sleep(0.001) end\n\
         print(worker.status(h))",
        fixture("sum.lus")
    );
    assert_eq!(run_capture(&source), "5\ndead\n");
}

#[test]
fn multi_worker_select_in_wall_clock_order() {
    let source = format!(
        "pledge('fs:read')\n\
         local a = worker.create('{d}', 0.01, 'a')\n\
         local b = worker.create('{d}', 0.09, 'b')\n\
         local c = worker.create('{d}', 0.05, 'c')\n\
         local seen = ''\n\
         for i = 1, 3 do\n\
           local x, y, z = worker.receive(a, b, c)\n\
           if x then seen = seen .. x end\n\
           if y then seen = seen .. y end\n\
           if z then seen = seen .. z end\n\
         end\n\
         print(seen)",
        d = fixture("delay.lus")
    );
    assert_eq!(run_capture(&source), "acb\n");
}

#[test]
fn worker_error_is_raised_at_receive() {
    let source = format!(
        "pledge('fs:read')\n\
         local h = worker.create('{}')\n\
         worker.receive(h)",
        fixture("fail.lus")
    );
    let mut interp = Interpreter::new();
    let err = interp.run_source(&source, "test").unwrap_err();
    assert!(err.to_string().contains("worker exploded"));
}

#[test]
fn send_peek_round_trip_preserves_order() {
    let source = format!(
        "pledge('fs:read')\n\
         local h = worker.create('{}')\n\
         worker.send(h, 'one')\n\
         worker.send(h, 'two')\n\
         local first = worker.receive(h)\n\
         local second = worker.receive(h)\n\
         worker.send(h, 'stop')\n\
         print(first, second)",
        fixture("echo.lus")
    );
    assert_eq!(run_capture(&source), "one\ttwo\n");
}

#[test]
fn worker_create_requires_fs_read() {
    let source = format!("worker.create('{}')", fixture("sum.lus"));
    let mut interp = Interpreter::new();
    let err = interp.run_source(&source, "test").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("fs:read"));
    assert!(message.contains("sum.lus"));
}

#[test]
fn tables_survive_the_worker_boundary() {
    let source = format!(
        "pledge('fs:read')\n\
         local h = worker.create('{}')\n\
         worker.send(h, {{ name = 'lus', version = 1 }})\n\
         local back = worker.receive(h)\n\
         worker.send(h, 'stop')\n\
         print(back.name, back.version)",
        fixture("echo.lus")
    );
    assert_eq!(run_capture(&source), "lus\t1\n");
}
