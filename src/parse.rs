use log::{debug, trace};

use crate::error::SyntaxError;
use crate::expression::{BinaryOperator, ExpressionTree, Function, Node, Slot, UnaryFunction};
use crate::FloatExt;

/// Parse `text` into an `f64` tree, returning it with its variable count.
pub fn parse(text: &str) -> Result<(Function, usize), SyntaxError> {
    let tree = Function::parse(text)?;
    let num_vars = tree.num_vars();
    Ok((tree, num_vars))
}

impl<Real: FloatExt> ExpressionTree<Real> {
    /// Parse the expression from `text`.
    ///
    /// Variables are single uppercase letters. As they are encountered they
    /// are given consecutive slots, so the first letter in the text is slot 0
    /// whatever its place in the alphabet.
    pub fn parse(text: &str) -> Result<Self, SyntaxError> {
        let result = Builder::new(text).run();
        match &result {
            Ok(tree) => debug!("parsed {text:?} with {} variables", tree.num_vars()),
            Err(err) => debug!("rejected {text:?}: {err}"),
        }
        result
    }

    /// Variable letters of `text` in slot order.
    pub fn parse_variable_names(text: &str) -> Result<Vec<char>, SyntaxError> {
        Ok(Self::parse(text)?.variables)
    }
}

/// Grammar symbols kept on the control stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Symbol {
    /// The whole input.
    Funct,
    /// An operand followed by any number of `Bi Exp` tails.
    Exp,
    /// One operand, possibly signed.
    Term,
    Un,
    OpenParen,
    CloseParen,
    Bi,
    OptBi,
    Var,
    End,
}

type NodeId = usize;

#[derive(Clone, Debug)]
enum Kind<Real> {
    Placeholder,
    Constant(Real),
    Variable(Slot),
    Unary(UnaryFunction),
    Binary(BinaryOperator),
}

#[derive(Clone, Debug)]
struct Cell<Real> {
    kind: Kind<Real>,
    children: [Option<NodeId>; 2],
    /// An absorbed parenthesis. Later operators never descend into it.
    sealed: bool,
}

impl<Real> Cell<Real> {
    fn new(kind: Kind<Real>) -> Self {
        Self {
            kind,
            children: [None, None],
            sealed: false,
        }
    }
}

impl<Real> Default for Cell<Real> {
    fn default() -> Self {
        Self::new(Kind::Placeholder)
    }
}

/// Where the next operand goes.
#[derive(Clone, Copy, Debug)]
enum Hole {
    Root,
    Child(NodeId, usize),
}

/// One-pass builder. Nodes live in an arena while the tree is being shaped,
/// and are moved into an owned [`Node`] tree once the scan succeeds.
struct Builder<'a, Real> {
    text: &'a str,
    pos: usize,
    cells: Vec<Cell<Real>>,
    root: Option<NodeId>,
    hole: Option<Hole>,
    open_parens: Vec<NodeId>,
    letters: Vec<char>,
}

impl<'a, Real: FloatExt> Builder<'a, Real> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            cells: Vec::new(),
            root: None,
            hole: Some(Hole::Root),
            open_parens: Vec::new(),
            letters: Vec::new(),
        }
    }

    fn run(mut self) -> Result<ExpressionTree<Real>, SyntaxError> {
        use Symbol::*;

        let mut stack = vec![Funct];
        while let Some(symbol) = stack.pop() {
            trace!("{symbol:?} at offset {}", self.pos);
            match symbol {
                Funct => {
                    if self.peek().is_none() {
                        return Err(SyntaxError::Empty);
                    }
                    stack.extend([End, Exp]);
                }
                Exp => stack.extend([OptBi, Term]),
                Term => match self.peek() {
                    Some(b'-') => {
                        self.pos += 1;
                        let sign = self.attach(Kind::Unary(UnaryFunction::Negate))?;
                        self.hole = Some(Hole::Child(sign, 0));
                        stack.push(Term);
                    }
                    Some(b'a'..=b'z') => stack.extend([CloseParen, Exp, OpenParen, Un]),
                    Some(b'(') => stack.extend([CloseParen, Exp, OpenParen]),
                    Some(b'A'..=b'Z' | b'0'..=b'9' | b'%') => stack.push(Var),
                    _ => return Err(self.unexpected()),
                },
                Un => self.function()?,
                OpenParen => self.open_paren()?,
                CloseParen => self.close_paren()?,
                Bi => self.binary_operator()?,
                OptBi => match self.peek() {
                    None | Some(b')') => {}
                    Some(c) if BinaryOperator::from_symbol(c).is_some() => {
                        stack.extend([Exp, Bi])
                    }
                    _ => return Err(self.unexpected()),
                },
                Var => self.operand()?,
                End => {
                    if self.peek().is_some() {
                        return Err(self.unexpected());
                    }
                }
            }
        }
        self.finish()
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn unexpected(&self) -> SyntaxError {
        match self.text[self.pos..].chars().next() {
            Some(found) => SyntaxError::UnexpectedChar {
                found,
                offset: self.pos,
            },
            None => SyntaxError::UnexpectedEnd { offset: self.pos },
        }
    }

    fn dangling(&self) -> SyntaxError {
        SyntaxError::Dangling { offset: self.pos }
    }

    fn alloc(&mut self, kind: Kind<Real>) -> NodeId {
        self.cells.push(Cell::new(kind));
        self.cells.len() - 1
    }

    /// Allocates a node and puts it in the pending hole.
    fn attach(&mut self, kind: Kind<Real>) -> Result<NodeId, SyntaxError> {
        let id = self.alloc(kind);
        match self.hole.take() {
            Some(Hole::Root) => self.root = Some(id),
            Some(Hole::Child(parent, index)) => self.cells[parent].children[index] = Some(id),
            None => return Err(self.dangling()),
        }
        Ok(id)
    }

    /// Makes `fresh` the parent of everything below `at`, keeping `at` as the
    /// node identity its own parent points to.
    ///
    /// The payloads swap places: `at` ends up holding `fresh`'s content with
    /// the old subtree as its first child, and its second child free.
    fn make_child(&mut self, at: NodeId, fresh: NodeId) {
        self.cells.swap(at, fresh);
        self.cells[at].children = [Some(fresh), None];
    }

    /// Collapses a parenthesis placeholder into its only child.
    fn absorb(&mut self, placeholder: NodeId, child: NodeId) {
        let mut content = std::mem::take(&mut self.cells[child]);
        content.sealed = true;
        self.cells[placeholder] = content;
    }

    /// Root of the innermost open group.
    fn group_root(&self) -> Result<NodeId, SyntaxError> {
        let root = match self.open_parens.last() {
            Some(&placeholder) => self.cells[placeholder].children[0],
            None => self.root,
        };
        root.ok_or_else(|| self.dangling())
    }

    fn function(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z')) {
            self.pos += 1;
        }
        let name = &self.text[start..self.pos];
        let function =
            UnaryFunction::from_name(name).ok_or_else(|| SyntaxError::UnknownFunction {
                name: name.to_string(),
                offset: start,
            })?;
        let id = self.attach(Kind::Unary(function))?;
        self.hole = Some(Hole::Child(id, 0));
        Ok(())
    }

    fn open_paren(&mut self) -> Result<(), SyntaxError> {
        if self.peek() != Some(b'(') {
            return Err(self.unexpected());
        }
        self.pos += 1;
        let id = self.attach(Kind::Placeholder)?;
        self.open_parens.push(id);
        self.hole = Some(Hole::Child(id, 0));
        Ok(())
    }

    fn close_paren(&mut self) -> Result<(), SyntaxError> {
        if self.peek() != Some(b')') {
            return Err(self.unexpected());
        }
        let placeholder = self.open_parens.pop().ok_or_else(|| self.dangling())?;
        let child = self.cells[placeholder].children[0].ok_or_else(|| self.dangling())?;
        self.absorb(placeholder, child);
        self.pos += 1;
        Ok(())
    }

    /// Places a binary operator by walking down the right spine of the
    /// current group while the operator binds tighter than what it finds,
    /// then re-parenting the subtree where it stops.
    fn binary_operator(&mut self) -> Result<(), SyntaxError> {
        let operator = self
            .peek()
            .and_then(BinaryOperator::from_symbol)
            .ok_or_else(|| self.unexpected())?;

        let mut at = self.group_root()?;
        loop {
            let cell = &self.cells[at];
            match (&cell.kind, cell.sealed, cell.children[1]) {
                (Kind::Binary(existing), false, Some(right)) if operator.binds_inside(*existing) => {
                    at = right
                }
                _ => break,
            }
        }

        let fresh = self.alloc(Kind::Binary(operator));
        self.make_child(at, fresh);
        self.hole = Some(Hole::Child(at, 1));
        self.pos += 1;
        Ok(())
    }

    /// A variable letter, a decimal integer, `%pi` or `%e`.
    fn operand(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        let kind = match self.peek() {
            Some(letter @ b'A'..=b'Z') => {
                self.pos += 1;
                Kind::Variable(self.slot_for(char::from(letter)))
            }
            Some(b'0'..=b'9') => {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
                let literal = &self.text[start..self.pos];
                let invalid = || SyntaxError::InvalidNumber {
                    literal: literal.to_string(),
                    offset: start,
                };
                let value = literal.parse::<Real>().map_err(|_| invalid())?;
                // Too many digits round to infinity.
                if !value.is_finite() {
                    return Err(invalid());
                }
                Kind::Constant(value)
            }
            Some(b'%') => {
                self.pos += 1;
                let rest = &self.text.as_bytes()[self.pos..];
                if rest.starts_with(b"pi") {
                    self.pos += 2;
                    Kind::Constant(Real::PI())
                } else if rest.starts_with(b"e") {
                    self.pos += 1;
                    Kind::Constant(Real::E())
                } else {
                    if rest.starts_with(b"p") {
                        self.pos += 1;
                    }
                    return Err(self.unexpected());
                }
            }
            _ => return Err(self.unexpected()),
        };
        self.attach(kind)?;
        Ok(())
    }

    fn slot_for(&mut self, letter: char) -> Slot {
        match self.letters.iter().position(|&seen| seen == letter) {
            Some(slot) => slot,
            None => {
                self.letters.push(letter);
                self.letters.len() - 1
            }
        }
    }

    fn finish(mut self) -> Result<ExpressionTree<Real>, SyntaxError> {
        let root = self.root.ok_or_else(|| self.dangling())?;
        let root = self.take_tree(root)?;
        Ok(ExpressionTree {
            root,
            variables: self.letters,
        })
    }

    /// Moves the cells reachable from `root` into an owned tree.
    ///
    /// Nodes are built bottom-up from a work stack, so tree depth never
    /// turns into call depth.
    fn take_tree(&mut self, root: NodeId) -> Result<Node<Real>, SyntaxError> {
        let mut pending = vec![Visit::Enter(root)];
        let mut built: Vec<Node<Real>> = Vec::new();
        while let Some(visit) = pending.pop() {
            match visit {
                Visit::Enter(id) => {
                    let Cell { kind, children, .. } = std::mem::take(&mut self.cells[id]);
                    match (kind, children) {
                        (Kind::Constant(value), _) => built.push(Node::Constant(value)),
                        (Kind::Variable(slot), _) => built.push(Node::Variable {
                            slot,
                            value: Real::nan(),
                        }),
                        (Kind::Unary(function), [Some(operand), _]) => {
                            pending.extend([Visit::Unary(function), Visit::Enter(operand)])
                        }
                        // Left is entered first, so it is built first.
                        (Kind::Binary(operator), [Some(left), Some(right)]) => pending.extend([
                            Visit::Binary(operator),
                            Visit::Enter(right),
                            Visit::Enter(left),
                        ]),
                        _ => return Err(self.dangling()),
                    }
                }
                Visit::Unary(function) => {
                    let operand = built.pop().ok_or_else(|| self.dangling())?;
                    built.push(Node::Unary {
                        function,
                        operand: Box::new(operand),
                    });
                }
                Visit::Binary(operator) => {
                    let right = built.pop().ok_or_else(|| self.dangling())?;
                    let left = built.pop().ok_or_else(|| self.dangling())?;
                    built.push(Node::Binary {
                        operator,
                        left: Box::new(left),
                        right: Box::new(right),
                    });
                }
            }
        }
        match (built.pop(), built.is_empty()) {
            (Some(root), true) => Ok(root),
            _ => Err(self.dangling()),
        }
    }
}

/// Steps of the arena-to-tree conversion.
enum Visit {
    Enter(NodeId),
    Unary(UnaryFunction),
    Binary(BinaryOperator),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(text: &str) -> String {
        Function::parse(text).unwrap().to_string()
    }

    fn reject(text: &str) -> SyntaxError {
        Function::parse(text).unwrap_err()
    }

    #[test]
    fn precedence_shapes() {
        assert_eq!(shape("2+3*4"), "(2+(3*4))");
        assert_eq!(shape("2*3+4"), "((2*3)+4)");
        assert_eq!(shape("2-3*4+1"), "((2-(3*4))+1)");
        assert_eq!(shape("2*3+4*5^2"), "((2*3)+(4*(5^2)))");
        assert_eq!(shape("1+2*3^4-5"), "((1+(2*(3^4)))-5)");
    }

    #[test]
    fn associativity_shapes() {
        assert_eq!(shape("8-3-2"), "((8-3)-2)");
        assert_eq!(shape("8/4*3"), "((8/4)*3)");
        assert_eq!(shape("2^3^2"), "(2^(3^2))");
    }

    #[test]
    fn parentheses_are_sealed() {
        assert_eq!(shape("(2+3)*4"), "((2+3)*4)");
        assert_eq!(shape("2*(3+4)^2"), "(2*((3+4)^2))");
        assert_eq!(shape("(1-2)-(3-4)"), "((1-2)-(3-4))");
        assert_eq!(shape("((7))"), "7");
        assert_eq!(shape("((1+2))*3"), "((1+2)*3)");
    }

    #[test]
    fn functions_and_signs() {
        assert_eq!(shape("sin(0)"), "sin(0)");
        assert_eq!(shape("abs(-5+0)"), "abs((-5+0))");
        assert_eq!(shape("-2^2"), "(-2^2)");
        assert_eq!(shape("2*-3"), "(2*-3)");
        assert_eq!(shape("-(1+2)*3"), "(-(1+2)*3)");
        assert_eq!(shape("sin(X)*cos(Y)"), "(sin(X)*cos(Y))");
        assert_eq!(shape("arctan(ln(%e))"), "arctan(ln(%e))");
        assert_eq!(shape("--X"), "--X");
    }

    #[test]
    fn slots_follow_first_appearance() {
        let (tree, num_vars) = parse("B+A*B-C").unwrap();
        assert_eq!(num_vars, 3);
        assert_eq!(tree.variables(), &['B', 'A', 'C']);
        match tree.root() {
            Node::Binary { left, .. } => match left.as_ref() {
                Node::Binary { left, .. } => {
                    assert!(matches!(left.as_ref(), Node::Variable { slot: 0, .. }))
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(Function::parse_variable_names("Z*Y+Z").unwrap(), vec!['Z', 'Y']);
        assert_eq!(parse("%pi*2").unwrap().1, 0);
    }

    #[test]
    fn integer_literals_are_maximal_runs() {
        let tree = Function::parse("1234+0007").unwrap();
        assert_eq!(tree.evaluate(), 1241.0);
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(reject(""), SyntaxError::Empty);
        assert_eq!(reject("(2+3"), SyntaxError::UnexpectedEnd { offset: 4 });
        assert_eq!(
            reject("2++3"),
            SyntaxError::UnexpectedChar {
                found: '+',
                offset: 2
            }
        );
        assert_eq!(
            reject("2 + 3"),
            SyntaxError::UnexpectedChar {
                found: ' ',
                offset: 1
            }
        );
        assert_eq!(
            reject("2)"),
            SyntaxError::UnexpectedChar {
                found: ')',
                offset: 1
            }
        );
        assert_eq!(
            reject("+2"),
            SyntaxError::UnexpectedChar {
                found: '+',
                offset: 0
            }
        );
        assert_eq!(
            reject("2(3)"),
            SyntaxError::UnexpectedChar {
                found: '(',
                offset: 1
            }
        );
        assert_eq!(
            reject("1.5"),
            SyntaxError::UnexpectedChar {
                found: '.',
                offset: 1
            }
        );
        assert_eq!(reject("2*"), SyntaxError::UnexpectedEnd { offset: 2 });
        assert_eq!(reject("()"), SyntaxError::UnexpectedChar { found: ')', offset: 1 });
        assert_eq!(reject("sin"), SyntaxError::UnexpectedEnd { offset: 3 });
        assert_eq!(reject("sin 0"), SyntaxError::UnexpectedChar { found: ' ', offset: 3 });
        assert_eq!(
            reject("X²"),
            SyntaxError::UnexpectedChar {
                found: '²',
                offset: 1
            }
        );
    }

    #[test]
    fn unknown_functions() {
        assert_eq!(
            reject("sinh(0)"),
            SyntaxError::UnknownFunction {
                name: "sinh".into(),
                offset: 0
            }
        );
        assert_eq!(
            reject("1+a(2)"),
            SyntaxError::UnknownFunction {
                name: "a".into(),
                offset: 2
            }
        );
    }

    #[test]
    fn symbolic_constants() {
        assert_eq!(reject("%x"), SyntaxError::UnexpectedChar { found: 'x', offset: 1 });
        assert_eq!(reject("%p"), SyntaxError::UnexpectedEnd { offset: 2 });
        assert_eq!(reject("%po"), SyntaxError::UnexpectedChar { found: 'o', offset: 2 });
        assert_eq!(reject("%"), SyntaxError::UnexpectedEnd { offset: 1 });
        assert_eq!(shape("%e^%pi"), "(%e^%pi)");
    }

    #[test]
    fn long_chains_parse() {
        let text = vec!["1"; 3_000].join("+");
        let (tree, num_vars) = parse(&text).unwrap();
        assert_eq!(num_vars, 0);
        assert_eq!(tree.evaluate(), 3_000.0);

        let text = vec!["X"; 3_000].join("-");
        let (mut tree, _) = parse(&text).unwrap();
        assert_eq!(tree.evaluate_at(1.0), -2_998.0);
    }

    #[test]
    fn overflowing_literals() {
        let digits = format!("1{}", "0".repeat(400));
        assert_eq!(
            reject(&format!("2+{digits}")),
            SyntaxError::InvalidNumber {
                literal: digits,
                offset: 2
            }
        );
        assert!(ExpressionTree::<f32>::parse(&"9".repeat(40)).is_err());
        assert_eq!(shape(&"9".repeat(300)), "9".repeat(300).parse::<f64>().unwrap().to_string());
    }

    #[test]
    fn f32_trees() {
        let tree = ExpressionTree::<f32>::parse("3*(1+1)^2").unwrap();
        assert_eq!(tree.evaluate(), 12.0);
    }
}
