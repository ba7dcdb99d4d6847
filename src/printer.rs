use std::io::Write;

use anyhow::Result;

use crate::executors::Executor;
use crate::tuple::schema::TypeId;

/// Renders an executor's tuples to a writer, either as aligned columns with
/// a header rule or as compact pipe-separated lines. Returns the number of
/// rows printed.
pub struct Printer<'a> {
    executor: Box<dyn Executor + 'a>,
    column_widths: Vec<usize>,
    aligned: bool,
}

impl<'a> Printer<'a> {
    pub fn new(executor: Box<dyn Executor + 'a>, aligned: bool) -> Self {
        let schema = executor.schema();
        let mut column_widths = vec![];
        for col in schema.columns() {
            let name_width = col.name.chars().count();
            let width = match col.type_id {
                TypeId::Integer => name_width.max(10),
                TypeId::Text => name_width.max(25),
            };
            column_widths.push(width);
        }

        Self {
            executor,
            column_widths,
            aligned,
        }
    }

    fn print_header(&self, writer: &mut impl Write) -> Result<()> {
        let names = self.executor.schema().columns().iter().map(|col| &col.name);
        if !self.aligned {
            let header = names.cloned().collect::<Vec<String>>().join("|");
            writeln!(writer, "{}", header)?;
            return Ok(());
        }

        let header = self
            .column_widths
            .iter()
            .zip(names)
            .map(|(width, name)| format!("{:>1$}", name, *width))
            .collect::<Vec<String>>()
            .join("|");
        writeln!(writer, "{}", header)?;
        let rule = self
            .column_widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<String>>()
            .join("+");
        writeln!(writer, "{}", rule)?;
        Ok(())
    }

    pub fn print_all_tuples(&mut self, writer: &mut impl Write) -> Result<usize> {
        self.print_header(writer)?;

        let mut rows = 0;
        while let Some(tuple) = self.executor.next() {
            let tuple = tuple?;
            let line = if self.aligned {
                self.column_widths
                    .iter()
                    .zip(tuple.values())
                    .map(|(width, value)| format!("{:>1$}", value, *width))
                    .collect::<Vec<String>>()
                    .join("|")
            } else {
                tuple
                    .values()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<String>>()
                    .join("|")
            };
            writeln!(writer, "{}", line)?;
            rows += 1;
        }
        Ok(rows)
    }
}
