//! hideproc End-to-End Smoke Test
//!
//! Drives the full stack against the in-memory host:
//!   Part A: Host: symbol table, pid table, module text
//!   Part B: Interception engine: install, double install, fault unwind
//!   Part C: Control channel: add/del/listing, size gates
//!   Part D: Enumeration filter: gaps, exhaustion, parity with the primitive
//!   Part E: Teardown: hook removed, registry drained, text unloaded
//!
//! Run: ./target/release/hideproc-smoke
//! (HIDEPROC_LOG_LEVEL=debug for the engine's own log lines)

use hideproc_core::enumerate::{FindGePid, ModuleLoader};
use hideproc_core::error::HideError;
use hideproc_core::pid::Pid;
use hideproc_core::symbol::SymbolTable;

use hideproc_module::guard::GuardKind;
use hideproc_module::mem_host::{addr, HostOp, MemHost};
use hideproc_module::{DefaultHideProc, HideConfig, HideProcBuilder};

use nix::errno::Errno;

use std::io::{Read, Write};
use std::sync::Arc;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn raw(pids: &[Pid]) -> Vec<i32> {
    pids.iter().map(|p| p.as_raw()).collect()
}

/// Helper: one open-write-close cycle on the control channel.
fn send(hp: &DefaultHideProc, payload: &[u8]) -> Result<usize, HideError> {
    let mut f = hp.channel().open();
    let r = f.write_commands(payload);
    let _ = f.close();
    r
}

/// Helper: one open-read-close cycle, like `cat /dev/hideproc`.
fn listing(hp: &DefaultHideProc) -> String {
    let mut out = String::new();
    let _ = hp.channel().open().read_to_string(&mut out);
    out
}

// ════════════════════════════════════════════════════════════
// Part A: Host
// ════════════════════════════════════════════════════════════

fn test_host(t: &mut TestRunner, host: &MemHost) {
    t.section("Part A: Host (symbols, pids, text)");

    let found = host.lookup("find_ge_pid");
    t.check(
        &format!(
            "lookup find_ge_pid -> {}",
            found.map(|a| a.to_string()).unwrap_or_else(|| "?".into())
        ),
        found == Some(addr::FIND_GE_PID),
        "not seeded",
    );
    t.check("lookup unknown symbol -> none", host.lookup("no_such_fn").is_none(), "found");

    let walk = host.proc_walk();
    t.check(
        &format!("unhooked walk sees {} pids", walk.len()),
        walk == host.live_pids(),
        &format!("{:?}", raw(&walk)),
    );

    let before = host.loaded_modules().len();
    match host.load_module("scratch", Arc::new(NoPids)) {
        Ok(text) => {
            t.check("load_module entry inside range", text.range.contains(text.entry), "outside");
            host.unload_module(text.range);
            t.check("unload_module", host.loaded_modules().len() == before, "still loaded");
        }
        Err(e) => t.fail("load_module", &e.to_string()),
    }
}

struct NoPids;

impl FindGePid for NoPids {
    fn find_ge_pid(&self, _nr: Pid) -> Option<Pid> {
        None
    }
}

// ════════════════════════════════════════════════════════════
// Part B: Interception engine
// ════════════════════════════════════════════════════════════

fn test_engine(t: &mut TestRunner) {
    t.section("Part B: Interception engine");

    // B1: register failure unwinds
    let host = Arc::new(MemHost::with_pids(1..=8));
    host.fail_next(HostOp::RegisterOps, Errno::EBUSY);
    let r = HideProcBuilder::new().config(HideConfig::new()).build(host.clone());
    t.check(
        "register failure aborts startup",
        matches!(r, Err(HideError::Register(Errno::EBUSY))),
        "unexpected result",
    );
    t.check("  ... text unloaded", host.loaded_modules().is_empty(), "leaked");
    t.check("  ... no ops left behind", host.registered_ops() == 0, "leaked");

    // B2: unresolved target
    let r = HideProcBuilder::new()
        .config(HideConfig::new().target_symbol("no_such_fn"))
        .build(host.clone());
    t.check(
        "unresolved symbol aborts startup",
        matches!(r, Err(HideError::Unresolved(_))),
        "unexpected result",
    );

    // B3: both guard forms
    for kind in [GuardKind::Reentry, GuardKind::ModuleRange] {
        let name = format!("install with {:?} guard", kind);
        match HideProcBuilder::new().config(HideConfig::new().guard(kind)).build(host.clone()) {
            Ok(mut hp) => {
                t.check(&name, hp.hook_active(), "hook inactive");
                let _ = send(&hp, b"add 3\n");
                let walk = raw(&host.proc_walk());
                t.check(
                    &format!("  ... walk skips 3 ({:?})", kind),
                    walk == vec![1, 2, 4, 5, 6, 7, 8],
                    &format!("{:?}", walk),
                );
                t.check(
                    "  ... second install rejected",
                    hp.install_hook() == Err(HideError::AlreadyInstalled),
                    "accepted",
                );
            }
            Err(e) => t.fail(&name, &e.to_string()),
        }
    }
}

// ════════════════════════════════════════════════════════════
// Part C: Control channel
// ════════════════════════════════════════════════════════════

fn test_channel(t: &mut TestRunner, hp: &DefaultHideProc) {
    t.section("Part C: Control channel");

    let n = send(hp, b"add 1234\n");
    t.check("write \"add 1234\\n\"", n == Ok(9), &format!("{:?}", n));
    let out = listing(hp);
    t.check("read -> \"pid: 1234\\n\"", out == "pid: 1234\n", &format!("{:?}", out));

    let _ = send(hp, b"add 1\nadd 2\ndel 9999\n");
    let out = listing(hp);
    t.check("del 9999 clears every entry", out.is_empty(), &format!("{:?}", out));

    let n = send(hp, b"xx\n");
    t.check(
        "\"xx\\n\" ignored",
        n == Ok(3) && hp.registry().is_empty(),
        &format!("{:?}", n),
    );

    let e = send(hp, b"a").map_err(|e| e.errno());
    t.check("undersized write -> EAGAIN", e == Err(Errno::EAGAIN), &format!("{:?}", e));

    let big = vec![b'\n'; hp.config().max_write];
    let e = send(hp, &big).map_err(|e| e.errno());
    t.check("oversized write -> EINVAL", e == Err(Errno::EINVAL), &format!("{:?}", e));
    t.check("  ... registry untouched", hp.registry().is_empty(), "mutated");

    let _ = send(hp, b"add 5\nadd 5\n");
    t.check(
        "duplicate add listed twice",
        listing(hp) == "pid:    5\npid:    5\n",
        "not duplicated",
    );

    let mut f = hp.channel().open();
    let mut buf = [0u8; 64];
    let first = f.read_listing(&mut buf);
    let second = f.read_listing(&mut buf);
    t.check(
        "second read on same handle is empty",
        first == 20 && second == 0,
        &format!("{} then {}", first, second),
    );
    let _ = f.write_all(b"del 5\n");
    let _ = f.close();

    let _ = send(hp, b"add 11\nadd 12\nadd 13\nadd 14\nadd 15\n");
    let out = listing(hp);
    t.check(
        "read_to_string lists all 5 entries",
        out.len() == 50 && out.ends_with("pid:   15\n"),
        &format!("{} bytes", out.len()),
    );
    let _ = send(hp, b"del 0\n");
}

// ════════════════════════════════════════════════════════════
// Part D: Enumeration filter
// ════════════════════════════════════════════════════════════

fn test_filter(t: &mut TestRunner, hp: &DefaultHideProc) {
    t.section("Part D: Enumeration filter");
    let host = hp.host();

    let _ = send(hp, b"add 2\nadd 3\n");
    let walk = raw(&host.proc_walk());
    t.check("hidden pids are gaps", walk == vec![1, 4, 5, 6, 7, 8], &format!("{:?}", walk));

    let got = host.enumerate_from(addr::PROC_PID_READDIR, Pid::new(2));
    t.check(
        "find_ge_pid(2) -> 4",
        got == Some(Pid::new(4)),
        &format!("{:?}", got),
    );

    let _ = send(hp, b"add 7\nadd 8\n");
    let got = host.enumerate_from(addr::PROC_PID_READDIR, Pid::new(7));
    t.check("hidden tail reports exhaustion", got.is_none(), &format!("{:?}", got));

    let live = host.live_pids();
    let mismatch = (0..12).map(Pid::new).find(|&nr| {
        let want = live.iter().copied().find(|&p| p >= nr && !hp.registry().is_hidden(p));
        host.enumerate_from(addr::NEXT_TGID, nr) != want
    });
    t.check(
        "visible results match the primitive",
        mismatch.is_none(),
        &format!("diverges at {:?}", mismatch),
    );

    host.spawn(Pid::new(9));
    let _ = send(hp, b"add 9\n");
    t.check(
        "pid spawned after hide stays hidden",
        !host.proc_walk().contains(&Pid::new(9)),
        "visible",
    );
}

// ════════════════════════════════════════════════════════════
// Part E: Teardown
// ════════════════════════════════════════════════════════════

fn test_teardown(t: &mut TestRunner, hp: DefaultHideProc) {
    t.section("Part E: Teardown");
    let host = hp.host().clone();
    let hidden = hp.registry().len();
    drop(hp);

    t.check(&format!("{} hidden entries released", hidden), hidden > 0, "nothing was hidden");
    t.check("ops unregistered", host.registered_ops() == 0, "still registered");
    t.check("text unloaded", host.loaded_modules().is_empty(), "still loaded");
    let walk = host.proc_walk();
    t.check(
        "walk unfiltered again",
        walk == host.live_pids(),
        &format!("{:?}", raw(&walk)),
    );
}

// ════════════════════════════════════════════════════════════

fn main() {
    println!("=== hideproc End-to-End Smoke Test ===");

    let mut t = TestRunner::new();
    let host = Arc::new(MemHost::with_pids(1..=8));

    // Part A
    test_host(&mut t, &host);

    // Part B
    test_engine(&mut t);

    // Build instance for Parts C-E
    let config = HideConfig::from_env();
    config.print();
    let hp = match HideProcBuilder::new().config(config).build(host.clone()) {
        Ok(hp) => hp,
        Err(e) => {
            println!("\nFATAL: HideProcBuilder failed: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };

    test_channel(&mut t, &hp);
    test_filter(&mut t, &hp);
    test_teardown(&mut t, hp);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
