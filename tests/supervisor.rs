#![cfg(unix)]

mod common;

use std::{collections::HashSet, sync::Arc, time::Duration};

use common::{AlwaysReady, Workspace};
use deckhand::domain::DeckId;
use futures::future::join_all;

#[tokio::test]
async fn concurrent_decks_receive_distinct_ports() {
    let workspace = Workspace::new("exec sleep 30", None);
    let entries: Vec<_> = (1..=4)
        .map(|id| (DeckId::new(id), workspace.add_project(&format!("deck-{id}"))))
        .collect();
    let supervisor = workspace.supervisor(Arc::new(AlwaysReady), 33_000, Duration::from_secs(5));

    let ports: Vec<u16> = join_all(
        entries
            .iter()
            .map(|(deck, entry)| supervisor.start_renderer(*deck, entry)),
    )
    .await
    .into_iter()
    .map(|result| result.expect("renderer starts"))
    .collect();

    let unique: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(unique.len(), ports.len(), "ports: {ports:?}");
    assert!(ports.iter().all(|port| supervisor.ports().contains(*port)));
    assert_eq!(supervisor.running_decks().await.len(), 4);

    assert_eq!(supervisor.kill_all().await, 4);
    assert!(supervisor.ports().is_empty());
    assert!(supervisor.running_decks().await.is_empty());
}

#[tokio::test]
async fn simultaneous_starts_for_one_deck_spawn_once() {
    let workspace = Workspace::new("exec sleep 30", None);
    let entry = workspace.add_project("shared");
    let supervisor = workspace.supervisor(Arc::new(AlwaysReady), 33_200, Duration::from_secs(5));
    let deck = DeckId::new(7);

    let ports: Vec<u16> = join_all((0..8).map(|_| supervisor.start_renderer(deck, &entry)))
        .await
        .into_iter()
        .map(|result| result.expect("renderer starts"))
        .collect();

    assert!(ports.windows(2).all(|pair| pair[0] == pair[1]), "ports: {ports:?}");
    assert_eq!(workspace.preview_launches(), 1);
    assert_eq!(supervisor.ports().reserved_ports(), vec![ports[0]]);

    supervisor.kill_all().await;
}

#[tokio::test]
async fn exited_renderer_releases_its_port_and_respawns() {
    let workspace = Workspace::new("sleep 0.3\nexit 0", None);
    let entry = workspace.add_project("short-lived");
    let supervisor = workspace.supervisor(Arc::new(AlwaysReady), 33_400, Duration::from_secs(5));
    let deck = DeckId::new(11);

    supervisor.start_renderer(deck, &entry).await.expect("first start");
    assert_eq!(workspace.preview_launches(), 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while supervisor.port_of(deck).await.is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "renderer never observed as exited"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(supervisor.ports().is_empty());

    supervisor.start_renderer(deck, &entry).await.expect("respawn");
    assert_eq!(workspace.preview_launches(), 2);

    supervisor.kill_all().await;
}

#[tokio::test]
async fn kill_all_terminates_the_processes() {
    let workspace = Workspace::new("exec sleep 30", None);
    let entry = workspace.add_project("doomed");
    let supervisor = workspace.supervisor(Arc::new(AlwaysReady), 33_600, Duration::from_secs(5));

    supervisor
        .start_renderer(DeckId::new(21), &entry)
        .await
        .expect("start");
    let pid = supervisor
        .running_decks()
        .await
        .first()
        .and_then(|renderer| renderer.pid)
        .expect("pid recorded");

    assert_eq!(supervisor.kill_all().await, 1);
    assert_eq!(supervisor.kill_all().await, 0);

    let alive = std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    assert!(!alive, "process {pid} still alive after kill_all");
}
