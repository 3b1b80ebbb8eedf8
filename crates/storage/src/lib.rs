pub mod db;

pub use db::{
    create_db, create_exam, delete_exam, delete_question_outcomes, enroll_student, find_exam,
    get_all_courses, get_course, get_course_by_code, get_course_exams, get_course_outcomes,
    get_course_students, get_exam, get_exam_papers, get_exam_result, get_exam_results,
    get_question_outcomes, get_student_by_number, get_student_papers, get_student_results,
    get_user_logs, insert_course_outcome, insert_exam_paper, log_action, save_exam_result,
    save_question_outcome, search_students, update_exam_question_scores, upsert_course,
    upsert_lecturer, upsert_student, DbPool, ExamPaperRecord, StudentExamRecord, UserLogEntry,
};
