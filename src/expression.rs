use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use crate::FloatExt;

/// Index of a variable, assigned in order of first appearance.
pub type Slot = usize;

/// A node of a parsed expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Node<Real = f64> {
    // Leaves.
    Constant(Real),
    Variable {
        slot: Slot,
        value: Real,
    },

    // Function applications.
    Unary {
        function: UnaryFunction,
        operand: Box<Node<Real>>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Node<Real>>,
        right: Box<Node<Real>>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryFunction {
    Negate,
    Ln,
    Abs,
    Sin,
    Cos,
    Tan,
    ArcSin,
    ArcCos,
    ArcTan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Named unary functions, keyed by their full spelling. `Negate` is spelled
/// `-` and never looked up here.
static FUNCTIONS: Lazy<HashMap<&'static str, UnaryFunction>> = Lazy::new(|| {
    use UnaryFunction::*;

    [
        ("ln", Ln),
        ("abs", Abs),
        ("sin", Sin),
        ("cos", Cos),
        ("tan", Tan),
        ("arcsin", ArcSin),
        ("arccos", ArcCos),
        ("arctan", ArcTan),
    ]
    .into_iter()
    .collect()
});

impl UnaryFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        FUNCTIONS.get(name).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::Ln => "ln",
            Self::Abs => "abs",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::ArcSin => "arcsin",
            Self::ArcCos => "arccos",
            Self::ArcTan => "arctan",
        }
    }

    pub fn apply<Real: FloatExt>(self, x: Real) -> Real {
        match self {
            Self::Negate => -x,
            Self::Ln => x.ln(),
            Self::Abs => x.abs(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::ArcSin => x.asin(),
            Self::ArcCos => x.acos(),
            Self::ArcTan => x.atan(),
        }
    }
}

impl BinaryOperator {
    pub fn from_symbol(symbol: u8) -> Option<Self> {
        match symbol {
            b'+' => Some(Self::Add),
            b'-' => Some(Self::Sub),
            b'*' => Some(Self::Mul),
            b'/' => Some(Self::Div),
            b'^' => Some(Self::Pow),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
            Self::Pow => '^',
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Pow => 3,
        }
    }

    pub fn is_right_associative(self) -> bool {
        matches!(self, Self::Pow)
    }

    /// Whether `self`, read after `existing`, must become a descendant of
    /// `existing` rather than its parent.
    pub fn binds_inside(self, existing: Self) -> bool {
        self.precedence() > existing.precedence()
            || (self.precedence() == existing.precedence() && self.is_right_associative())
    }

    pub fn apply<Real: FloatExt>(self, lhs: Real, rhs: Real) -> Real {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::Pow => lhs.powf(rhs),
        }
    }
}

/// A successfully parsed expression.
///
/// The tree shape is fixed once parsing succeeds; only the values held by
/// [`Node::Variable`] leaves change, through [`ExpressionTree::rebind`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExpressionTree<Real = f64> {
    pub(crate) root: Node<Real>,
    /// Variable letters, indexed by slot.
    pub(crate) variables: Vec<char>,
}

/// The `f64` expression tree.
pub type Function = ExpressionTree<f64>;

impl<Real: FloatExt> ExpressionTree<Real> {
    pub fn root(&self) -> &Node<Real> {
        &self.root
    }

    /// Number of distinct variables, i.e. the number of slots.
    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    /// Variable letters in slot order.
    pub fn variables(&self) -> &[char] {
        &self.variables
    }

    /// Overwrites the value of every variable leaf bound to `slot`.
    ///
    /// Every node is visited, however many leaves match.
    pub fn rebind(&mut self, slot: Slot, value: Real) {
        self.root.rebind(slot, value);
    }

    /// Drops the whole tree.
    pub fn dispose(self) {
        drop(self)
    }
}

impl<Real: FloatExt> Node<Real> {
    fn rebind(&mut self, target: Slot, new_value: Real) {
        match self {
            Self::Constant(_) => {}
            Self::Variable { slot, value } => {
                if *slot == target {
                    *value = new_value;
                }
            }
            Self::Unary { operand, .. } => operand.rebind(target, new_value),
            Self::Binary { left, right, .. } => {
                left.rebind(target, new_value);
                right.rebind(target, new_value);
            }
        }
    }

    fn write(&self, variables: &[char], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => {
                if *value == Real::PI() {
                    write!(f, "%pi")
                } else if *value == Real::E() {
                    write!(f, "%e")
                } else {
                    write!(f, "{value}")
                }
            }
            Self::Variable { slot, .. } => match variables.get(*slot) {
                Some(letter) => write!(f, "{letter}"),
                None => Err(fmt::Error),
            },
            Self::Unary { function, operand } => {
                write!(f, "{}", function.name())?;
                // A sign needs no parentheses of its own: binary operands
                // already carry them.
                if *function == UnaryFunction::Negate {
                    return operand.write(variables, f);
                }
                write!(f, "(")?;
                operand.write(variables, f)?;
                write!(f, ")")
            }
            Self::Binary {
                operator,
                left,
                right,
            } => {
                write!(f, "(")?;
                left.write(variables, f)?;
                write!(f, "{}", operator.symbol())?;
                right.write(variables, f)?;
                write!(f, ")")
            }
        }
    }
}

/// Writes the tree back out in the input grammar, parenthesizing every binary
/// sub-expression.
impl<Real: FloatExt> fmt::Display for ExpressionTree<Real> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.write(&self.variables, f)
    }
}
