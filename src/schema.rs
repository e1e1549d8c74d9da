//! Diesel table definitions mirroring the embedded migrations.

diesel::table! {
    users (email) {
        email -> Text,
        nick_name -> Text,
        first_name -> Text,
        last_name -> Nullable<Text>,
        phone -> Text,
        password -> Text,
        about -> Nullable<Text>,
        last_active_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    librarians (username) {
        username -> Text,
        password -> Text,
        email -> Text,
    }
}

diesel::table! {
    visits (id) {
        id -> Integer,
        user_email -> Text,
        visited_on -> Date,
    }
}

diesel::table! {
    sections (id) {
        id -> Integer,
        name -> Text,
        description -> Text,
        created_on -> Date,
    }
}

diesel::table! {
    books (id) {
        id -> Integer,
        title -> Text,
        author -> Text,
        content -> Text,
        file_name -> Nullable<Text>,
        section_id -> Integer,
        holder -> Nullable<Text>,
        issue_date -> Nullable<Date>,
        due_date -> Nullable<Date>,
    }
}

diesel::table! {
    requests (id) {
        id -> Integer,
        user_email -> Text,
        book_id -> Integer,
        pending -> Bool,
        opened_on -> Date,
        closed_on -> Nullable<Date>,
        outcome -> Nullable<Text>,
    }
}

diesel::table! {
    owners (id) {
        id -> Integer,
        user_email -> Text,
        book_id -> Integer,
    }
}

diesel::table! {
    reads (id) {
        id -> Integer,
        user_email -> Text,
        book_id -> Integer,
        read_on -> Date,
    }
}

diesel::table! {
    feedback (id) {
        id -> Integer,
        book_id -> Integer,
        user_email -> Text,
        rating -> Integer,
        comment -> Text,
        given_on -> Date,
    }
}

diesel::joinable!(books -> sections (section_id));
diesel::joinable!(reads -> books (book_id));
diesel::joinable!(feedback -> books (book_id));

diesel::allow_tables_to_appear_in_same_query!(
    users, librarians, visits, sections, books, requests, owners, reads, feedback,
);
