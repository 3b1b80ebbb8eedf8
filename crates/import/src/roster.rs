use examscan_core::Student;
use std::io::Read;
use thiserror::Error;

/// Accepted header spellings for the student number column.
const NUMBER_HEADERS: &[&str] = &["Öğrenci No", "Ogrenci No", "student_number"];
/// Accepted header spellings for the full name column.
const NAME_HEADERS: &[&str] = &["Ad Soyad", "full_name"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("No students in roster")]
    NoDataRows,
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim().trim_start_matches('\u{feff}');
        names.iter().any(|n| h.eq_ignore_ascii_case(n))
    })
}

/// Reads a class list exported as CSV. Rows with a blank number or name
/// are skipped.
pub fn import_roster<R: Read>(data: R) -> Result<Vec<Student>, RosterError> {
    let delimiter = b',';
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    let number_col = find_column(&headers, NUMBER_HEADERS)
        .ok_or_else(|| RosterError::MissingColumn(NUMBER_HEADERS[0].to_string()))?;
    let name_col = find_column(&headers, NAME_HEADERS)
        .ok_or_else(|| RosterError::MissingColumn(NAME_HEADERS[0].to_string()))?;

    let mut students = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result?;
        let number = record.get(number_col).unwrap_or_default().trim();
        let name = record.get(name_col).unwrap_or_default().trim();

        if number.is_empty() || name.is_empty() {
            tracing::debug!("Skipping incomplete roster row {}", line + 2);
            continue;
        }
        students.push(Student::new(number, name));
    }

    if students.is_empty() {
        return Err(RosterError::NoDataRows);
    }

    tracing::info!("Imported {} students from roster", students.len());
    Ok(students)
}

#[cfg(test)]
mod tests {
    use super::*;
    use examscan_core::Department;

    #[test]
    fn turkish_headers() {
        let data = "Öğrenci No,Ad Soyad\n21253501, Jane Doe \n20110042,Ali Veli\n";
        let students = import_roster(data.as_bytes()).unwrap();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].student_number, "21253501");
        assert_eq!(students[0].full_name, "Jane Doe");
        assert_eq!(students[0].department, Department::Ceng);
        assert_eq!(students[1].department, Department::Other);
    }

    #[test]
    fn ascii_aliases_and_extra_columns() {
        let data = "Sira,full_name,student_number,Bolum\n1,Jane Doe,21253501,CENG\n";
        let students = import_roster(data.as_bytes()).unwrap();
        assert_eq!(students[0].student_number, "21253501");
        assert_eq!(students[0].full_name, "Jane Doe");
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let data = "\u{feff}Ogrenci No,Ad Soyad\n21253501,Jane Doe\n";
        assert_eq!(import_roster(data.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn blank_rows_skipped() {
        let data = "Ogrenci No,Ad Soyad\n,\n21253501,Jane Doe\n 20110042 ,\n";
        let students = import_roster(data.as_bytes()).unwrap();
        assert_eq!(students.len(), 1);
    }

    #[test]
    fn missing_column() {
        let data = "Numara,Ad Soyad\n1,Jane\n";
        assert!(matches!(
            import_roster(data.as_bytes()),
            Err(RosterError::MissingColumn(c)) if c == "Öğrenci No"
        ));
    }

    #[test]
    fn empty_roster() {
        let data = "Ogrenci No,Ad Soyad\n";
        assert!(matches!(import_roster(data.as_bytes()), Err(RosterError::NoDataRows)));
    }
}
