//! SmartSQL schema DDL and demo data.

/// Table definitions, applied in order by `Store::migrate`.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS Users (
        user_id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        username TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL DEFAULT '',
        user_type TEXT NOT NULL CHECK (user_type IN ('Student', 'Instructor')),
        profile_info TEXT
    )",
    "CREATE TABLE IF NOT EXISTS Student (
        student_id INTEGER PRIMARY KEY REFERENCES Users(user_id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS Instructor (
        instructor_id INTEGER PRIMARY KEY REFERENCES Users(user_id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS Course (
        course_id INTEGER PRIMARY KEY AUTOINCREMENT,
        course_name TEXT NOT NULL,
        course_code TEXT NOT NULL,
        instructor_id INTEGER NOT NULL REFERENCES Instructor(instructor_id),
        course_description TEXT,
        year INTEGER,
        term INTEGER,
        state TEXT NOT NULL DEFAULT 'active'
    )",
    "CREATE TABLE IF NOT EXISTS Enrollment (
        enrollment_id INTEGER PRIMARY KEY AUTOINCREMENT,
        student_id INTEGER NOT NULL REFERENCES Student(student_id),
        course_id INTEGER NOT NULL REFERENCES Course(course_id),
        status TEXT NOT NULL DEFAULT 'enrolled',
        UNIQUE (student_id, course_id)
    )",
    "CREATE TABLE IF NOT EXISTS Module (
        module_id INTEGER PRIMARY KEY AUTOINCREMENT,
        course_id INTEGER NOT NULL REFERENCES Course(course_id),
        module_name TEXT NOT NULL,
        module_description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS Exercise (
        exercise_id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        description TEXT,
        hint TEXT,
        difficulty TEXT,
        table_schema TEXT,
        expected_answer TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS Module_Exercise (
        module_id INTEGER NOT NULL REFERENCES Module(module_id),
        exercise_id INTEGER NOT NULL REFERENCES Exercise(exercise_id),
        display_order INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (module_id, exercise_id)
    )",
    "CREATE TABLE IF NOT EXISTS Student_Exercise (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        student_id INTEGER NOT NULL REFERENCES Student(student_id),
        exercise_id INTEGER NOT NULL REFERENCES Exercise(exercise_id),
        submitted_answer TEXT,
        is_correct INTEGER NOT NULL DEFAULT 0,
        score REAL NOT NULL DEFAULT 0,
        submission_count INTEGER NOT NULL DEFAULT 0,
        completed_at TEXT,
        UNIQUE (student_id, exercise_id)
    )",
    "CREATE TABLE IF NOT EXISTS Score (
        student_id INTEGER NOT NULL REFERENCES Student(student_id),
        course_id INTEGER NOT NULL REFERENCES Course(course_id),
        total_score REAL NOT NULL DEFAULT 0,
        rank INTEGER,
        PRIMARY KEY (student_id, course_id)
    )",
    "CREATE TABLE IF NOT EXISTS Message (
        message_id INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_id INTEGER NOT NULL REFERENCES Users(user_id),
        receiver_id INTEGER NOT NULL REFERENCES Users(user_id),
        course_id INTEGER REFERENCES Course(course_id),
        content TEXT NOT NULL,
        sent_at TEXT NOT NULL
    )",
];

/// Small fixture: students 1-3, instructors 10 and 11.
///
/// Instructor 10 teaches courses 100 and 101, instructor 11 teaches 200 and
/// the archived 201. Student 3 dropped course 101, so instructor 10 does not
/// teach them.
pub const DEMO_DATA: &[&str] = &[
    "INSERT INTO Users (user_id, first_name, last_name, username, email, password, user_type) VALUES
        (1, 'Alice', 'Nguyen', 'alice', 'alice@smartsql.dev', 'pbkdf2$demo', 'Student'),
        (2, 'Bob', 'Martin', 'bob', 'bob@smartsql.dev', 'pbkdf2$demo', 'Student'),
        (3, 'Chen', 'Wei', 'chen', 'chen@smartsql.dev', 'pbkdf2$demo', 'Student'),
        (10, 'Dana', 'Smith', 'dsmith', 'dsmith@smartsql.dev', 'pbkdf2$demo', 'Instructor'),
        (11, 'Emil', 'Jones', 'ejones', 'ejones@smartsql.dev', 'pbkdf2$demo', 'Instructor')",
    "INSERT INTO Student (student_id) VALUES (1), (2), (3)",
    "INSERT INTO Instructor (instructor_id) VALUES (10), (11)",
    "INSERT INTO Course (course_id, course_name, course_code, instructor_id, course_description, year, term, state) VALUES
        (100, 'Introduction to SQL', 'SQL101', 10, 'SELECT, WHERE and ORDER BY', 2024, 3, 'active'),
        (101, 'Advanced SQL', 'SQL201', 10, 'Window functions and CTEs', 2025, 1, 'active'),
        (200, 'Database Design', 'DB300', 11, 'Normalization and keys', 2024, 3, 'active'),
        (201, 'Legacy Reporting', 'SQL099', 11, NULL, 2022, 1, 'archived')",
    "INSERT INTO Enrollment (student_id, course_id, status) VALUES
        (1, 100, 'enrolled'),
        (1, 200, 'enrolled'),
        (2, 100, 'enrolled'),
        (3, 200, 'enrolled'),
        (3, 101, 'dropped')",
    "INSERT INTO Module (module_id, course_id, module_name, module_description) VALUES
        (1000, 100, 'SELECT basics', 'Projection and filtering'),
        (1001, 100, 'Joins', 'Inner and outer joins'),
        (2000, 200, 'Normal forms', NULL)",
    "INSERT INTO Exercise (exercise_id, title, description, hint, difficulty, expected_answer) VALUES
        (1, 'Count students', 'How many students are there?', 'Use COUNT', 'easy', 'SELECT COUNT(*) FROM Student'),
        (2, 'List courses', 'List every course name', NULL, 'easy', 'SELECT course_name FROM Course'),
        (3, 'Warm-up', 'Select the number one', NULL, 'easy', 'SELECT 1'),
        (4, 'Enrollments', 'Show all enrollments', NULL, 'medium', 'SELECT * FROM Enrollment')",
    "INSERT INTO Module_Exercise (module_id, exercise_id, display_order) VALUES
        (1000, 1, 1),
        (1001, 2, 1),
        (2000, 4, 1)",
    "INSERT INTO Student_Exercise (student_id, exercise_id, submitted_answer, is_correct, score, submission_count, completed_at) VALUES
        (1, 1, 'SELECT COUNT(*) FROM Student', 1, 100.0, 1, '2024-10-01T10:00:00Z'),
        (1, 2, 'SELECT course_name FROM Course', 1, 100.0, 1, '2024-10-02T10:00:00Z'),
        (2, 1, 'SELECT * FROM Student', 0, 0.0, 2, '2024-10-03T10:00:00Z')",
    "INSERT INTO Score (student_id, course_id, total_score, rank) VALUES
        (1, 100, 200.0, 1),
        (2, 100, 0.0, 2),
        (1, 200, 0.0, 1),
        (3, 200, 0.0, 2)",
    "INSERT INTO Message (sender_id, receiver_id, course_id, content, sent_at) VALUES
        (10, 1, 100, 'Welcome to SQL101', '2024-09-01T09:00:00Z')",
];
