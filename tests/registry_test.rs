/*!
 * Registry Lifecycle Tests
 * Join/leave accounting, cross-handle visibility, and teardown of the
 * shared objects by whichever instance happens to leave last
 */

mod common;

use common::{config, config_as, unique_namespace, Decoy};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::shm_open;
use nix::sys::stat::Mode;
use nix::sys::wait::waitpid;
use nix::unistd::Pid as NixPid;
use pretty_assertions::assert_eq;
use procwarden::{EventKind, Launcher, ProcessMode, ProcessStatus, RegistryHandle};
use serial_test::serial;
use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

fn registry_name_exists(namespace: &str) -> bool {
    match shm_open(
        format!("/{namespace}-registry").as_str(),
        OFlag::O_RDWR,
        Mode::empty(),
    ) {
        Ok(_fd) => true,
        Err(Errno::ENOENT) => false,
        Err(e) => panic!("unexpected shm_open error: {e}"),
    }
}

fn lock_name_exists(namespace: &str) -> bool {
    let name = CString::new(format!("/{namespace}-lock")).unwrap();
    // SAFETY: plain sem_open probe without O_CREAT.
    let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
    if sem == libc::SEM_FAILED {
        false
    } else {
        // SAFETY: sem came from sem_open just above.
        unsafe { libc::sem_close(sem) };
        true
    }
}

#[test]
fn test_first_join_creates_second_attaches() {
    let ns = unique_namespace("attach");
    let decoy = Decoy::spawn();

    let a = RegistryHandle::join(config(&ns)).unwrap();
    assert!(a.created());
    assert_eq!(a.lock().unwrap().instance_count(), 1);

    let b = RegistryHandle::join(config_as(&ns, decoy.pid())).unwrap();
    assert!(!b.created());
    assert_eq!(b.lock().unwrap().instance_count(), 2);

    a.leave().unwrap();
    b.leave().unwrap();
}

#[test]
fn test_join_leave_symmetry_destroys_once() {
    let ns = unique_namespace("symmetry");
    let decoys: Vec<Decoy> = (0..3).map(|_| Decoy::spawn()).collect();

    let first = RegistryHandle::join(config(&ns)).unwrap();
    let mut handles = vec![first];
    for decoy in &decoys {
        handles.push(RegistryHandle::join(config_as(&ns, decoy.pid())).unwrap());
    }

    assert_eq!(handles[0].lock().unwrap().instance_count(), 4);

    // leave in an order unrelated to joining; only the final leave tears down
    let order = [1usize, 0, 3, 2];
    for (left, &index) in order.iter().enumerate() {
        let report = handles[index].leave().unwrap();
        let is_last = left == order.len() - 1;
        assert_eq!(report.torn_down, is_last, "leave #{left}");
        assert_eq!(registry_name_exists(&ns), !is_last);
    }

    assert!(!registry_name_exists(&ns));
    assert!(!lock_name_exists(&ns));
}

#[test]
#[serial]
fn test_two_instance_scenario() {
    let ns = unique_namespace("scenario");

    // Instance A creates the registry and launches an attached child.
    let a = Arc::new(RegistryHandle::join(config(&ns)).unwrap());
    assert!(a.created());
    assert_eq!(a.lock().unwrap().instance_count(), 1);

    let launcher = Launcher::new(Arc::clone(&a));
    let pid = launcher.launch("sleep 100", ProcessMode::Attached).unwrap();

    {
        let guard = a.lock().unwrap();
        assert_eq!(guard.process_count(), 1);
        let snap = guard.snapshot();
        assert_eq!(snap[0].pid, pid);
        assert_eq!(snap[0].owner_pid, a.instance_id());
        assert_eq!(snap[0].mode, ProcessMode::Attached);
        assert_eq!(snap[0].status, ProcessStatus::Running);
        assert_eq!(snap[0].command, "sleep 100");
    }

    // Instance B attaches and sees the same entry.
    let decoy = Decoy::spawn();
    let b = RegistryHandle::join(config_as(&ns, decoy.pid())).unwrap();
    assert!(!b.created());
    {
        let guard = b.lock().unwrap();
        assert_eq!(guard.instance_count(), 2);
        let snap = guard.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].pid, pid);
    }

    // B also saw the Created event A published at launch time.
    let created = b
        .next_event(Duration::from_secs(2))
        .unwrap()
        .expect("created event");
    assert_eq!(created.kind, EventKind::Created);
    assert_eq!(created.sender_pid, a.instance_id());
    assert_eq!(created.target_pid, pid);

    // A leaves cleanly: its attached child is signaled and removed, and the
    // registry survives because B is still attached.
    let report = a.leave().unwrap();
    assert_eq!(report.killed, vec![pid]);
    assert!(!report.torn_down);
    assert!(registry_name_exists(&ns));

    let terminated = b
        .next_event(Duration::from_secs(2))
        .unwrap()
        .expect("terminated event");
    assert_eq!(terminated.kind, EventKind::Terminated);
    assert_eq!(terminated.target_pid, pid);

    {
        let guard = b.lock().unwrap();
        assert_eq!(guard.instance_count(), 1);
        assert!(guard.snapshot().is_empty());
    }

    // reap the SIGTERMed child so the test process leaves no zombie
    waitpid(NixPid::from_raw(pid), None).unwrap();

    // B is last out; everything shared is destroyed.
    let report = b.leave().unwrap();
    assert!(report.torn_down);
    assert!(!registry_name_exists(&ns));
    assert!(!lock_name_exists(&ns));
}

#[test]
fn test_bus_ring_overflow_drops_excess() {
    let ns = unique_namespace("overflow");
    let decoy = Decoy::spawn();

    let a = RegistryHandle::join(config(&ns)).unwrap();
    let b = RegistryHandle::join(config_as(&ns, decoy.pid())).unwrap();

    // B floods well past the ring depth in one burst.
    {
        let mut guard = b.lock().unwrap();
        for i in 0..40 {
            guard.publish(EventKind::Terminated, 100_000 + i);
        }
    }

    // A receives exactly one ring's worth; the overflow was dropped, not
    // deferred.
    let mut received = Vec::new();
    while let Some(event) = a.next_event(Duration::from_millis(200)).unwrap() {
        received.push(event.target_pid);
    }
    assert_eq!(received.len(), 32);
    assert_eq!(received[0], 100_000);
    assert_eq!(received[31], 100_031);

    a.leave().unwrap();
    b.leave().unwrap();
}
