// Integration test for IPC client

use overseer::control::Action;
use overseer::error::OverseerError;
use overseer::ipc::IpcClient;

#[test]
fn test_client_daemon_not_running() {
    let client = IpcClient::with_socket_path("/tmp/test_overseer_nonexistent.sock");

    match client.control(Action::Start, "all") {
        Err(OverseerError::DaemonNotRunning) => {}
        other => panic!("Expected DaemonNotRunning error, got: {:?}", other),
    }
}

#[test]
fn test_client_socket_path() {
    let custom_path = "/tmp/custom_overseer_test.sock";
    let client = IpcClient::with_socket_path(custom_path);
    assert_eq!(client.socket_path().to_str().unwrap(), custom_path);
}
