use diesel::prelude::*;

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::audio_files)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AudioFile {
    pub id: i32,
    pub original_filename: String,
    pub opus_path: String,
    pub s3_opus_key: Option<String>,
    pub archive_source: String,
    pub duration_seconds: Option<f64>,
    pub file_size_bytes: i64,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::audio_files)]
pub struct NewAudioFile<'a> {
    pub original_filename: &'a str,
    pub opus_path: &'a str,
    pub archive_source: &'a str,
    pub duration_seconds: Option<f64>,
    pub file_size_bytes: i64,
    pub status: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::transcripts)]
pub struct NewTranscript<'a> {
    pub audio_file_id: i32,
    pub transcript_text: &'a str,
    pub language: &'a str,
    pub confidence: f64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::classifications)]
pub struct NewClassification<'a> {
    pub audio_file_id: i32,
    pub flagged: bool,
    pub flag_score: f64,
    pub flag_category: Option<&'a str>,
}

/// Row of the flagged-items review feed consumed by downstream tooling.
#[derive(Queryable, Debug)]
pub struct FlaggedItem {
    pub id: i32,
    pub original_filename: String,
    pub s3_opus_key: Option<String>,
    pub transcript_text: String,
    pub flag_score: f64,
    pub flag_category: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
