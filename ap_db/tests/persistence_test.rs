use ap_db::{NewAudioFile, NewClassification, NewTranscript};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio_postgres::NoTls;
use types::AudioStatus;

const SCHEMA_SQL: &str =
    include_str!("../migrations/2025-05-20-000000_create_pipeline_tables/up.sql");

async fn start_postgres() -> (testcontainers::ContainerAsync<Postgres>, String) {
    let container = Postgres::default()
        .start()
        .await
        .expect("failed to start postgres container");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get postgres port");

    let url = ap_db::database_url("127.0.0.1", port, "postgres", "postgres", "postgres");

    // Apply the schema directly; the workers expect the tables to exist.
    let (client, connection) = tokio_postgres::connect(
        &format!("host=127.0.0.1 port={port} dbname=postgres user=postgres password=postgres"),
        NoTls,
    )
    .await
    .expect("failed to connect to postgres");
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("postgres connection error: {e}");
        }
    });
    client
        .batch_execute(SCHEMA_SQL)
        .await
        .expect("failed to apply schema");

    (container, url)
}

#[tokio::test]
#[ignore]
async fn clip_rows_flow_through_the_status_machine() {
    let (_container, url) = start_postgres().await;
    let pool = ap_db::create_pool(&url).await.expect("pool");
    ap_db::check_connectivity(&pool).await.expect("connectivity");

    let audio_id = ap_db::insert_audio_file(
        &pool,
        &NewAudioFile {
            original_filename: "a.mp3",
            opus_path: "/data/scratch/b1/a.opus",
            archive_source: "b1",
            duration_seconds: Some(12.5),
            file_size_bytes: 4096,
            status: AudioStatus::Pending.as_str(),
        },
    )
    .await
    .expect("insert audio file");
    assert!(audio_id > 0);

    ap_db::insert_transcript(
        &pool,
        &NewTranscript {
            audio_file_id: audio_id,
            transcript_text: "some reportable content",
            language: "en",
            confidence: 0.87,
        },
    )
    .await
    .expect("insert transcript");

    ap_db::insert_classification(
        &pool,
        &NewClassification {
            audio_file_id: audio_id,
            flagged: true,
            flag_score: 0.91,
            flag_category: Some("harassment"),
        },
    )
    .await
    .expect("insert classification");

    ap_db::update_audio_status(&pool, audio_id, AudioStatus::Flagged)
        .await
        .expect("update status");
    ap_db::update_audio_s3_key(&pool, audio_id, "processed/2025-01-01/1.opus")
        .await
        .expect("update s3 key");

    let flagged = ap_db::pending_flagged(&pool, 10).await.expect("flagged feed");
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].id, audio_id);
    assert_eq!(flagged[0].transcript_text, "some reportable content");
    assert_eq!(flagged[0].flag_score, 0.91);
    assert_eq!(
        flagged[0].s3_opus_key.as_deref(),
        Some("processed/2025-01-01/1.opus")
    );

    let stats = ap_db::processing_stats(&pool).await.expect("stats");
    assert_eq!(stats, vec![("flagged".to_string(), 1)]);
}

#[tokio::test]
#[ignore]
async fn failed_clips_do_not_enter_the_review_feed() {
    let (_container, url) = start_postgres().await;
    let pool = ap_db::create_pool(&url).await.expect("pool");

    let audio_id = ap_db::insert_audio_file(
        &pool,
        &NewAudioFile {
            original_filename: "b.mp3",
            opus_path: "/data/scratch/b1/b.opus",
            archive_source: "b1",
            duration_seconds: None,
            file_size_bytes: 0,
            status: AudioStatus::Pending.as_str(),
        },
    )
    .await
    .expect("insert audio file");

    ap_db::update_audio_status(&pool, audio_id, AudioStatus::Failed)
        .await
        .expect("update status");

    let flagged = ap_db::pending_flagged(&pool, 10).await.expect("flagged feed");
    assert!(flagged.is_empty());

    let stats = ap_db::processing_stats(&pool).await.expect("stats");
    assert_eq!(stats, vec![("failed".to_string(), 1)]);
}
