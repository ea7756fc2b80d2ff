use log::debug;

use crate::error::EvalError;
use crate::expression::{ExpressionTree, Node};
use crate::FloatExt;

#[cfg(feature = "rayon")]
use rayon::prelude::{
    IndexedParallelIterator, IntoParallelRefIterator, ParallelExtend, ParallelIterator,
};

impl<Real: FloatExt> ExpressionTree<Real> {
    /// Computes the value of the tree with the variable values currently
    /// bound.
    pub fn evaluate(&self) -> Real {
        self.root.evaluate()
    }

    /// Evaluates an expression without variables; NaN if it has any.
    pub fn evaluate_without_vars(&self) -> Real {
        if self.num_vars() != 0 {
            debug!("expected 0 variable values, tree has {}", self.num_vars());
            return Real::nan();
        }
        self.evaluate()
    }

    /// Evaluates a single-variable expression at `x`; NaN unless the tree
    /// has exactly one variable.
    pub fn evaluate_at(&mut self, x: Real) -> Real {
        self.evaluate_with(&[x])
    }

    /// Binds `values` to slots `0..values.len()` and evaluates; NaN unless
    /// there is exactly one value per variable.
    pub fn evaluate_with(&mut self, values: &[Real]) -> Real {
        self.try_evaluate_with(values).unwrap_or_else(|err| {
            debug!("{err}");
            Real::nan()
        })
    }

    /// Like [`Self::evaluate_with`], but reports a count mismatch as an
    /// error.
    pub fn try_evaluate_with(&mut self, values: &[Real]) -> Result<Real, EvalError> {
        validate_arity(self.num_vars(), values.len())?;
        for (slot, value) in values.iter().enumerate() {
            self.rebind(slot, *value);
        }
        Ok(self.evaluate())
    }

    /// Evaluates once per row, where each row holds one value per variable.
    ///
    /// Each worker binds rows into its own copy of the tree, so `self` is
    /// left untouched.
    pub fn evaluate_rows<R: AsRef<[Real]> + Sync>(
        &self,
        rows: &[R],
    ) -> Result<Vec<Real>, EvalError> {
        for row in rows {
            validate_arity(self.num_vars(), row.as_ref().len())?;
        }

        #[cfg(feature = "rayon")]
        let output = rows
            .par_iter()
            .map_init(|| self.clone(), |tree, row| tree.bind_and_evaluate(row.as_ref()))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let output = {
            let mut tree = self.clone();
            rows.iter()
                .map(|row| tree.bind_and_evaluate(row.as_ref()))
                .collect()
        };
        Ok(output)
    }

    fn bind_and_evaluate(&mut self, row: &[Real]) -> Real {
        for (slot, value) in row.iter().enumerate() {
            self.rebind(slot, *value);
        }
        self.evaluate()
    }

    /// Calculates the results of the expression component-wise, with
    /// `columns[slot]` holding the values of the variable in `slot`.
    ///
    /// Values bound with [`Self::rebind`] are ignored.
    pub fn evaluate_columns<C: AsRef<[Real]>>(
        &self,
        columns: &[C],
        registers: &mut Registers<Real>,
    ) -> Result<Vec<Real>, EvalError> {
        validate_arity(self.num_vars(), columns.len())?;
        validate_columns(columns, registers.register_length)?;
        Ok(self.root.evaluate_columns(columns, registers))
    }
}

fn validate_arity(expected: usize, found: usize) -> Result<(), EvalError> {
    if expected != found {
        return Err(EvalError::ArityMismatch { expected, found });
    }
    Ok(())
}

fn validate_columns<T, C: AsRef<[T]>>(columns: &[C], expected: usize) -> Result<(), EvalError> {
    for column in columns {
        let found = column.as_ref().len();
        if found != expected {
            return Err(EvalError::ColumnLength { expected, found });
        }
    }
    Ok(())
}

impl<Real: FloatExt> Node<Real> {
    fn evaluate(&self) -> Real {
        match self {
            Self::Constant(value) => *value,
            Self::Variable { value, .. } => *value,
            Self::Unary { function, operand } => function.apply(operand.evaluate()),
            Self::Binary {
                operator,
                left,
                right,
            } => operator.apply(left.evaluate(), right.evaluate()),
        }
    }

    fn evaluate_columns<C: AsRef<[Real]>>(
        &self,
        columns: &[C],
        registers: &mut Registers<Real>,
    ) -> Vec<Real> {
        match self {
            Self::Binary {
                operator,
                left,
                right,
            } => {
                let operator = *operator;
                evaluate_binary_op(
                    move |lhs, rhs| operator.apply(lhs, rhs),
                    left,
                    right,
                    columns,
                    registers,
                )
            }
            // This branch should only be taken if the entire expression is
            // literally the identity map from one of the columns.
            Self::Variable { slot, .. } => {
                let mut output = registers.allocate();
                output.extend_from_slice(columns[*slot].as_ref());
                output
            }
            Self::Constant(value) => {
                let mut output = registers.allocate();
                output.extend(std::iter::repeat(*value).take(registers.register_length));
                output
            }
            Self::Unary { function, operand } => {
                let function = *function;
                evaluate_unary_op(move |only| function.apply(only), operand, columns, registers)
            }
        }
    }
}

fn evaluate_binary_op<Real: FloatExt, C: AsRef<[Real]>>(
    op: impl Fn(Real, Real) -> Real + Send + Sync,
    lhs: &Node<Real>,
    rhs: &Node<Real>,
    columns: &[C],
    registers: &mut Registers<Real>,
) -> Vec<Real> {
    // Variables read straight from their column instead of being copied into
    // a register first.
    let lhs_reg = match lhs {
        Node::Variable { .. } => None,
        _ => Some(lhs.evaluate_columns(columns, registers)),
    };
    let rhs_reg = match rhs {
        Node::Variable { .. } => None,
        _ => Some(rhs.evaluate_columns(columns, registers)),
    };
    let lhs_values = operand_values(lhs, lhs_reg.as_deref(), columns);
    let rhs_values = operand_values(rhs, rhs_reg.as_deref(), columns);
    // Allocate this output register as lazily as possible.
    let mut output = registers.allocate();

    #[cfg(feature = "rayon")]
    {
        output.par_extend(
            lhs_values
                .par_iter()
                .zip(rhs_values.par_iter())
                .map(|(lhs, rhs)| op(*lhs, *rhs)),
        );
    }
    #[cfg(not(feature = "rayon"))]
    {
        output.extend(
            lhs_values
                .iter()
                .zip(rhs_values.iter())
                .map(|(lhs, rhs)| op(*lhs, *rhs)),
        );
    }

    if let Some(r) = lhs_reg {
        registers.recycle(r);
    }
    if let Some(r) = rhs_reg {
        registers.recycle(r);
    }
    output
}

fn evaluate_unary_op<Real: FloatExt, C: AsRef<[Real]>>(
    op: impl Fn(Real) -> Real + Send + Sync,
    only: &Node<Real>,
    columns: &[C],
    registers: &mut Registers<Real>,
) -> Vec<Real> {
    let only_reg = match only {
        Node::Variable { .. } => None,
        _ => Some(only.evaluate_columns(columns, registers)),
    };
    let only_values = operand_values(only, only_reg.as_deref(), columns);
    let mut output = registers.allocate();

    #[cfg(feature = "rayon")]
    {
        output.par_extend(only_values.par_iter().map(|only| op(*only)));
    }
    #[cfg(not(feature = "rayon"))]
    {
        output.extend(only_values.iter().map(|only| op(*only)));
    }

    if let Some(r) = only_reg {
        registers.recycle(r);
    }
    output
}

fn operand_values<'a, Real: FloatExt, C: AsRef<[Real]>>(
    node: &Node<Real>,
    register: Option<&'a [Real]>,
    columns: &'a [C],
) -> &'a [Real] {
    match (register, node) {
        (Some(values), _) => values,
        (None, Node::Variable { slot, .. }) => columns[*slot].as_ref(),
        (None, _) => &[],
    }
}

/// Scratch space for column evaluation. Can be reused across evaluations with
/// the same column length.
///
/// Attempts to minimize allocations by recycling registers after intermediate
/// calculations have finished.
pub struct Registers<Real = f64> {
    num_allocations: usize,
    registers: Vec<Vec<Real>>,
    register_length: usize,
}

impl<Real> Registers<Real> {
    pub fn new(register_length: usize) -> Self {
        Self {
            num_allocations: 0,
            registers: vec![],
            register_length,
        }
    }

    fn recycle(&mut self, mut used: Vec<Real>) {
        used.clear();
        self.registers.push(used);
    }

    fn allocate(&mut self) -> Vec<Real> {
        self.registers.pop().unwrap_or_else(|| {
            self.num_allocations += 1;
            Vec::with_capacity(self.register_length)
        })
    }

    pub fn num_allocations(&self) -> usize {
        self.num_allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Function;

    #[test]
    fn call_forms_check_arity() {
        let mut constant = Function::parse("2*3").unwrap();
        assert_eq!(constant.evaluate_without_vars(), 6.0);
        assert!(constant.evaluate_at(1.0).is_nan());
        assert_eq!(constant.evaluate_with(&[]), 6.0);

        let mut single = Function::parse("X^2").unwrap();
        assert!(single.evaluate_without_vars().is_nan());
        assert_eq!(single.evaluate_at(3.0), 9.0);
        assert_eq!(single.evaluate_with(&[4.0]), 16.0);
        assert!(single.evaluate_with(&[4.0, 5.0]).is_nan());

        let mut pair = Function::parse("X-Y").unwrap();
        assert!(pair.evaluate_at(3.0).is_nan());
        assert_eq!(pair.evaluate_with(&[3.0, 5.0]), -2.0);
        assert_eq!(
            pair.try_evaluate_with(&[1.0]),
            Err(EvalError::ArityMismatch {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn evaluation_is_repeatable() {
        let mut tree = Function::parse("sin(X)/cos(X)-tan(X)").unwrap();
        let first = tree.evaluate_at(0.3);
        let second = tree.evaluate_at(0.3);
        assert_eq!(first, second);
        assert!(first.abs() < 1e-12);
    }

    #[test]
    fn rows() {
        let tree = Function::parse("A*B+A").unwrap();
        let rows = [[1.0, 2.0], [3.0, 4.0], [0.5, -2.0]];
        assert_eq!(tree.evaluate_rows(&rows).unwrap(), vec![3.0, 15.0, -0.5]);
        assert_eq!(
            tree.evaluate_rows(&[vec![1.0]]),
            Err(EvalError::ArityMismatch {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn columns() {
        let tree = Function::parse("2*(F+B)*-Z").unwrap();
        let f = [7.0, 8.0, 9.0];
        let b = [1.0, 2.0, 3.0];
        let z = [4.0, 5.0, 6.0];
        let columns = &[f, b, z];
        let mut registers = Registers::new(3);
        let output = tree.evaluate_columns(columns, &mut registers).unwrap();
        assert_eq!(&output, &[-64.0, -100.0, -144.0]);
        assert_eq!(registers.num_allocations(), 3);
    }

    #[test]
    fn column_allocations_limited_by_recycling() {
        let tree = Function::parse("X+Y+Z+X+Y+Z+X+Y+Z").unwrap();
        let columns: &[&[f64]] = &[&[7.0, 8.0, 9.0], &[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]];
        let mut registers = Registers::new(3);
        let output = tree.evaluate_columns(columns, &mut registers).unwrap();
        assert_eq!(&output, &[36.0, 45.0, 54.0]);
        assert_eq!(registers.num_allocations(), 2);
    }

    #[test]
    fn column_errors() {
        let tree = Function::parse("X+Y").unwrap();
        let mut registers = Registers::new(2);
        assert_eq!(
            tree.evaluate_columns(&[[1.0, 2.0]], &mut registers),
            Err(EvalError::ArityMismatch {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            tree.evaluate_columns(&[vec![1.0, 2.0], vec![3.0]], &mut registers),
            Err(EvalError::ColumnLength {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn constant_columns() {
        let tree = Function::parse("%pi").unwrap();
        let mut registers = Registers::new(2);
        let output = tree
            .evaluate_columns::<[f64; 0]>(&[], &mut registers)
            .unwrap();
        assert_eq!(output, vec![std::f64::consts::PI; 2]);
    }
}
