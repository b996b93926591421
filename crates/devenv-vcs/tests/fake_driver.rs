use std::path::Path;

use devenv_vcs::{FakeJjDriver, JjDriver};

#[tokio::test]
async fn clone_then_edit_moves_working_copy() {
    let driver = FakeJjDriver::new();
    let dest = Path::new("/tmp/devenv-fake-repo");

    driver.clone_colocated("git@h:u/r", dest).await.unwrap();
    let state = driver.current_state(dest).await.unwrap();
    assert_eq!(state.change_id.0, "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz");

    driver.edit(dest, "abcd1234").await.unwrap();
    let state = driver.current_state(dest).await.unwrap();
    assert_eq!(state.change_id.0, "abcd1234");
}

#[tokio::test]
async fn clone_failure_is_reported() {
    let driver = FakeJjDriver::new();
    driver
        .fail_clone
        .lock()
        .unwrap()
        .insert("git@h:u/bad".to_string());

    let err = driver
        .clone_colocated("git@h:u/bad", Path::new("/tmp/devenv-fake-bad"))
        .await
        .unwrap_err();
    assert!(matches!(err, devenv_vcs::JjError::NonZeroExit { .. }));
}
