diesel::table! {
    audio_files (id) {
        id -> Int4,
        original_filename -> Varchar,
        opus_path -> Text,
        s3_opus_key -> Nullable<Text>,
        archive_source -> Varchar,
        duration_seconds -> Nullable<Float8>,
        file_size_bytes -> Int8,
        status -> Varchar,
        created_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    transcripts (id) {
        id -> Int4,
        audio_file_id -> Int4,
        transcript_text -> Text,
        language -> Varchar,
        confidence -> Float8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    classifications (id) {
        id -> Int4,
        audio_file_id -> Int4,
        flagged -> Bool,
        flag_score -> Float8,
        flag_category -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(transcripts -> audio_files (audio_file_id));
diesel::joinable!(classifications -> audio_files (audio_file_id));

diesel::allow_tables_to_appear_in_same_query!(audio_files, transcripts, classifications);
